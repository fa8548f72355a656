pub mod telegram;
pub mod terminal;

use error_stack::Report;
use futures::future::BoxFuture;

use crate::error::NotifyError;
use crate::model::NotificationPayload;

/// Sink for crossing notifications.
pub trait Notifier: Send + Sync {
    fn notify<'a>(
        &'a self,
        payload: &'a NotificationPayload,
    ) -> BoxFuture<'a, Result<(), Report<NotifyError>>>;
}
