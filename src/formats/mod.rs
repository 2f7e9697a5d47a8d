//! Output format module for the Windows Memory Parser tool
pub mod csv;
pub mod json;
pub mod jsonl;
pub mod text;
pub mod traits;
