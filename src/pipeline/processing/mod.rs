// Pipeline processing: reduction, join, imputation, normalization, scoring, aggregation

pub mod aggregate;
pub mod impute;
pub mod join;
pub mod normalize;
pub mod rank;
pub mod reduce;
pub mod score;

pub use aggregate::{AggregationOutcome, AggregationWarning, Aggregator};
pub use impute::{ImputationEngine, ImputationReport};
pub use join::{JoinDiagnostic, JoinEngine, JoinOutcome, JoinPlan};
pub use normalize::{MinMaxNormalizer, NormalizationReport, Normalizer};
pub use rank::Ranker;
pub use reduce::{CategoryReducer, ReducedSource, ReductionSpec};
pub use score::{DefaultRiskScorer, RiskScorer};
