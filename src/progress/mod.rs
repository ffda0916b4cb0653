//! 进度层
//!
//! - `event` - 进度事件（带 `type` 区分的联合类型）
//! - `sink` - 事件输出接口，编排器和批处理器唯一依赖的东西
//! - `sse` - 把事件流编码为 `data: <json>\n\n` 帧

pub mod event;
pub mod sink;
pub mod sse;

pub use event::ProgressEvent;
pub use sink::{CollectingSink, NullSink, ProgressSink};
pub use sse::{encode_frame, pump_frames, write_rejection, PumpReport};
