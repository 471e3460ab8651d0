pub mod deploy;
pub mod destroy;
pub mod graph;
pub mod init;
pub mod plan;
pub mod simulate;
pub mod status;
pub mod synth;
pub mod validate;
