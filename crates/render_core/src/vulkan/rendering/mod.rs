// Command recording and pipeline state

pub mod commands;
pub mod framebuffer;
pub mod pipeline;
pub mod pipeline_cache;
pub mod pipeline_layout;
pub mod queue;
pub mod render_pass;
pub mod shader;
