pub mod notification;

pub use notification::{LogNotifier, SlackNotifier, notifier_from_config};
