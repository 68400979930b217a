//! The offline controller and the lifecycle around it.
//!
//! | State | Serves requests | Description |
//! |-------|-----------------|-------------|
//! | parsed | no | Constructed, install not attempted |
//! | installing | no | Fetching the asset manifest |
//! | installed | no | Shell stored, waiting for activation |
//! | active | yes | Old generations evicted, intercepting requests |
//! | redundant | no | Install failed, or superseded by a newer version |

mod controller;
mod event;
mod notification;
mod policy;
mod registration;

pub use controller::{ControllerConfig, FetchOutcome};
pub use event::{Event, EventOutcome};
pub use notification::{ConsoleHost, Notification, PushPayload};
pub use registration::Registration;
