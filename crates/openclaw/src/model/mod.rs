pub mod ids;
pub mod policy;
pub mod request;
pub mod run;
pub mod serve;

pub use ids::RunId;
pub use policy::*;
pub use request::*;
pub use run::*;
pub use serve::*;
