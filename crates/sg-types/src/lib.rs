pub mod args;
pub mod errors;
pub mod experiment;
pub mod observation;
pub mod suggestion;

pub use args::*;
pub use errors::*;
pub use experiment::*;
pub use observation::*;
pub use suggestion::*;
