//! Domain types for the Push Port ingester.
//!
//! Identifiers are validated at construction, so code that receives these
//! types can trust their validity. The time module holds the time-of-day
//! type and the resolver that turns it into absolute instants.

mod identifiers;
mod location;
mod time;

pub use identifiers::{InvalidIdentifier, Rid, Uid};
pub use location::{Crs, InvalidLocation, Tiploc};
pub use time::{FEED_TIMEZONE, TimeCursor, TimeError, TrainTime, resolve};
