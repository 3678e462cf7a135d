mod chain;
mod deposit;
mod redemption;

pub use chain::*;
pub use deposit::*;
pub use redemption::*;
