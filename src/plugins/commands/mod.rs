//! Built-in command plugins

mod actions;
mod astdb;
mod exten;
mod lists;
mod pjsip;
mod queues;

pub use actions::ResponsePlugin;
pub use astdb::DbGet;
pub use exten::ExtenStatus;
pub use lists::ListPlugin;
pub use pjsip::PjsipDetails;
pub use queues::QueueDetails;

pub(crate) use lists::parked_call_info;
pub(crate) use queues::member_info;

use super::CommandPlugin;
use crate::error::{AmiError, AmiResult};
use crate::frame::AmiFrame;

/// `Ok(message)` for anything but `Response: Error`
pub(crate) fn completion_for(frame: &AmiFrame) -> AmiResult<Option<String>> {
    let message = frame
        .message()
        .map(str::to_string);
    if frame.is_error() {
        Err(AmiError::CommandFailed {
            message: message.unwrap_or_else(|| "error".to_string()),
        })
    } else {
        Ok(message)
    }
}

pub(super) fn builtin() -> Vec<Box<dyn CommandPlugin>> {
    let mut plugins: Vec<Box<dyn CommandPlugin>> = actions::builtin()
        .into_iter()
        .map(|p| Box::new(p) as Box<dyn CommandPlugin>)
        .collect();
    plugins.push(Box::new(lists::list_channels()));
    plugins.push(Box::new(lists::list_parkings()));
    plugins.push(Box::new(lists::list_parked_calls()));
    plugins.push(Box::new(lists::list_meetme()));
    plugins.push(Box::new(QueueDetails::new()));
    plugins.push(Box::new(PjsipDetails::new()));
    plugins.push(Box::new(ExtenStatus));
    plugins.push(Box::new(DbGet::dnd()));
    plugins.push(Box::new(DbGet::call_forward()));
    plugins.push(Box::new(DbGet::call_forward_voicemail()));
    plugins
}
