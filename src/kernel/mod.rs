//! Kernel functions and blocked kernel evaluation

pub mod evaluator;
pub mod gaussian;
pub mod laplacian;
pub mod linear;
pub mod polynomial;
pub mod spec;
pub mod traits;

pub use self::evaluator::*;
pub use self::gaussian::*;
pub use self::laplacian::*;
pub use self::linear::*;
pub use self::polynomial::*;
pub use self::spec::*;
pub use self::traits::*;
