pub mod analyze;
pub mod health;
pub mod mcp;
pub mod scaffolds;
