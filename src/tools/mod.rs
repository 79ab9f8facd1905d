//! 能力层：SQL 生成、SQL 反思、SQL 执行，以及统一分派的能力执行器
pub mod capability;
pub mod execute_sql;
pub mod executor;
pub mod generate_sql;
pub mod reflect;
pub mod schema;

pub use capability::{Capability, CapabilityCall, CapabilityKind};
pub use execute_sql::{DatabaseExecutor, QueryResult, SqlExecutor, SqlRow};
pub use executor::{CapabilityExecutor, CapabilityOutput};
pub use generate_sql::{is_sql_shaped, SqlCandidate, SqlSynthesizer};
pub use reflect::{PotentialIssues, ReflectionCritic, ReflectionVerdict};
pub use schema::{extract_json_block, tool_batch_schema_json, tool_call_schema_json};
