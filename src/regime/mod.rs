// =============================================================================
// Regime Detection Module
// =============================================================================
//
// Binary range/trend classification from ADX, Bollinger Band Width
// percentile, and VWAP slope.

pub mod detector;

pub use detector::{classify, RegimeConfig, RegimeThresholds};
