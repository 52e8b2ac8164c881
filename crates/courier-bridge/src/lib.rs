pub mod telegram;

pub use telegram::TelegramBridge;
