pub mod cache;
pub mod engine;
pub mod error;
pub mod include;
pub mod parameters;
pub mod parser;
pub mod values;

pub use cache::CompiledParamCache;
pub use engine::{ParamDefinitions, SearchContext, resource_matches};
pub use error::SearchError;
pub use include::{EntryMode, IncludeDirective, IncludeKind, ResultEntry, ResultSet};
pub use parameters::{Comparator, SearchModifier, SearchParamType, SearchParameterDefinition};
pub use parser::{ParsedSearchParameter, ParsedValue, parse_query};
