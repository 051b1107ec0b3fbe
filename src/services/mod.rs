pub mod poller;

pub use poller::{PollEvent, PollHandle, PollingService};
