//! Contract lifecycle and goal evaluation for a city simulation.
//!
//! A [`Catalog`] holds normalized definitions, a [`ContractBook`] owns the
//! active and completed sets, and goal kinds plug in through
//! [`GoalRegistry`]. Host facts and money go through [`CityHost`].

mod bootstrap;
mod daily;

pub mod catalog;
pub mod city;
pub mod goals;
pub mod host;
pub mod lifecycle;
pub mod listeners;
pub mod requirements;
pub mod session;

pub use catalog::{Catalog, CatalogError};
pub use city::CityModel;
pub use goals::{happiness_percent, GoalHandler, GoalRegistry, GoalSetup};
pub use host::CityHost;
pub use lifecycle::{AlmostAvailable, ContractBook, ContractObserver, ContractState};
pub use listeners::ListenerTable;
pub use requirements::requirement_status;
pub use session::CitySession;
