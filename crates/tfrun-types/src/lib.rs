pub mod run;
pub mod workspace;

pub use run::*;
pub use workspace::*;
