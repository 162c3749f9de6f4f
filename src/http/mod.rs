pub mod probes;

use tokio::select;
use tokio_util::sync::CancellationToken;

pub(crate) async fn shutdown(cancel: CancellationToken) {
    select! {
        _ = cancel.cancelled() => {}
    }
}
