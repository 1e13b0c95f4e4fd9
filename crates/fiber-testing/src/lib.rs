//! Deterministic scheduler and `TestRoot` harness for driving fiber roots in tests.

pub mod testing;

pub use testing::*;

pub mod prelude {
    pub use crate::testing::*;
    pub use fiber_core::prelude::*;
}
