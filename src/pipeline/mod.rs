pub mod mailbox;

pub use mailbox::{Deposit, FrameMailbox, Take};
