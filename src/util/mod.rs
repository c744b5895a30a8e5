pub mod observable;
pub mod subscribe;

pub use observable::Observable;
pub use subscribe::{Observer, Unsubscribe};
