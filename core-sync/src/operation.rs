//! Replaying a queued mutation against the remote API.

use bridge_traits::error::{BridgeError, Result};
use bridge_traits::{ReadingRecordUpsert, RemoteApi};
use core_library::OperationPayload;

/// Issue the remote call for `payload`.
///
/// Every call is safe to repeat. A shelf-add answered with 409 (already on
/// the shelf) or a shelf-remove answered with 404 (already gone) has reached
/// its end state and counts as success.
pub async fn apply(remote: &dyn RemoteApi, payload: &OperationPayload) -> Result<()> {
    let result = match payload {
        OperationPayload::ProgressSave {
            book_id,
            chapter_id,
            progress_percentage,
            reading_position,
            ..
        } => {
            remote
                .upsert_reading_record(&ReadingRecordUpsert {
                    book_id: *book_id,
                    chapter_id: *chapter_id,
                    progress_percentage: *progress_percentage,
                    reading_position: *reading_position,
                })
                .await
        }
        OperationPayload::ShelfAdd { book_id } => remote.add_to_shelf(*book_id).await,
        OperationPayload::ShelfRemove { book_id } => remote.remove_from_shelf(*book_id).await,
        OperationPayload::FavoriteSet { book_id, favorite } => {
            remote.set_favorite(*book_id, *favorite).await
        }
    };

    match result {
        Err(BridgeError::Http { status: 409, .. })
            if matches!(payload, OperationPayload::ShelfAdd { .. }) =>
        {
            Ok(())
        }
        Err(BridgeError::Http { status: 404, .. })
            if matches!(payload, OperationPayload::ShelfRemove { .. }) =>
        {
            Ok(())
        }
        other => other,
    }
}
