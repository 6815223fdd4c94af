//! # Green Indexer
//!
//! 球管道状态机：跟踪机构内每个球的位置，并以"一个球径"为单位驱动皮带。
//!
//! ```text
//! 入口 → Entering → BottomCorner → InCorner → VerticalCorner → Unbuffered → Top → Shooting → 发射
//!         (head)                                                                    (tail)
//! ```
//!
//! - [`BallPipeline`]：状态机本体，由控制循环每周期调用 [`BallPipeline::tick`]
//! - [`BeltGeometry`]：皮带几何参数，计算一次 shift 的 ticks
//! - [`ShiftTicket`] / [`ShiftOutcome`]：shift 请求的凭据与结果

mod error;
mod geometry;
mod pipeline;
mod shift;
mod stage;

pub use error::PipelineError;
pub use geometry::BeltGeometry;
pub use pipeline::{BallPipeline, PipelineConfig, PipelineStatus};
pub use shift::{ShiftDirection, ShiftOperation, ShiftOutcome, ShiftTicket};
pub use stage::{Ball, Stage};
