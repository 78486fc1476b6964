pub mod analyze;
pub mod health;
pub mod mcp_http;
pub mod scaffolds;
