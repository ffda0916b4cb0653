//! 流式传输适配
//!
//! 每个事件编码为一帧 `data: <json>\n\n`。流以 `connected` 开始，
//! 以 `complete` 或 `error` 结束，之后关闭连接。没有心跳和重试指令。

use futures::{Stream, StreamExt};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::debug;

use crate::progress::event::ProgressEvent;

/// 编码单帧
pub fn encode_frame(event: &ProgressEvent) -> Result<String, serde_json::Error> {
    let json = serde_json::to_string(event)?;
    Ok(format!("data: {}\n\n", json))
}

/// 写出结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PumpReport {
    pub frames: usize,
    /// 是否写出了终止帧
    pub terminated: bool,
    /// 终止帧是否为 `complete`
    pub completed: bool,
}

/// 把事件流写成 SSE 帧，直到终止事件为止
///
/// 如果流的第一个事件不是 `connected`，先补一帧 `connected`。
/// 写入失败（例如调用方断开）直接返回错误，底层运行不受影响。
pub async fn pump_frames<S, W>(stream: S, writer: &mut W) -> std::io::Result<PumpReport>
where
    S: Stream<Item = ProgressEvent>,
    W: AsyncWrite + Unpin,
{
    let mut stream = std::pin::pin!(stream);
    let mut report = PumpReport {
        frames: 0,
        terminated: false,
        completed: false,
    };

    while let Some(event) = stream.next().await {
        if report.frames == 0 && event != ProgressEvent::Connected {
            write_event(writer, &ProgressEvent::Connected).await?;
            report.frames += 1;
        }

        write_event(writer, &event).await?;
        report.frames += 1;

        if event.is_terminal() {
            report.terminated = true;
            report.completed = matches!(event, ProgressEvent::Complete { .. });
            break;
        }
    }

    writer.flush().await?;
    debug!("SSE 输出结束，共 {} 帧", report.frames);
    Ok(report)
}

/// 运行无法启动时（例如请求校验失败）输出的两帧：`connected` + `error`
pub async fn write_rejection<W>(writer: &mut W, message: &str) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    write_event(writer, &ProgressEvent::Connected).await?;
    write_event(writer, &ProgressEvent::error(None, message)).await?;
    writer.flush().await
}

async fn write_event<W>(writer: &mut W, event: &ProgressEvent) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let frame = encode_frame(event).map_err(std::io::Error::other)?;
    writer.write_all(frame.as_bytes()).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::stage::StageKind;

    #[test]
    fn test_encode_frame() {
        let frame = encode_frame(&ProgressEvent::Connected).unwrap();
        assert_eq!(frame, "data: {\"type\":\"connected\"}\n\n");
    }

    #[tokio::test]
    async fn test_pump_stops_after_terminal_and_prepends_connected() {
        let events = vec![
            ProgressEvent::Data {
                stage: StageKind::Samples,
                partial_artifacts: vec![],
            },
            ProgressEvent::error(Some(StageKind::Samples), "失败"),
            // 终止之后的事件不应被写出
            ProgressEvent::Connected,
        ];

        let mut out = Vec::new();
        let report = pump_frames(futures::stream::iter(events), &mut out)
            .await
            .unwrap();

        assert_eq!(report.frames, 3);
        assert!(report.terminated);
        assert!(!report.completed);

        let text = String::from_utf8(out).unwrap();
        let frames: Vec<&str> = text.split("\n\n").filter(|f| !f.is_empty()).collect();
        assert_eq!(frames.len(), 3);
        assert!(frames[0].contains("\"connected\""));
        assert!(frames[1].contains("\"data\""));
        assert!(frames[2].contains("\"error\""));
        assert!(frames.iter().all(|f| f.starts_with("data: ")));
    }

    #[tokio::test]
    async fn test_write_rejection() {
        let mut out = Vec::new();
        write_rejection(&mut out, "步骤编号超出范围").await.unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.starts_with("data: {\"type\":\"connected\"}\n\n"));
        assert!(text.ends_with("\n\n"));
        assert!(text.contains("步骤编号超出范围"));
    }
}
