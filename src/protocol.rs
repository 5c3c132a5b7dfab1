//! 机器人通信协议
//! Wire protocol between the sentinel and the robot.
//!
//! 视频通道: `[4字节大端长度][JPEG负载]` 连续消息,单向
//! 指令通道: 每100ms推送一行 `"<MOTION>|<SPEECH>\n"`,SPEECH 为空或 `"<TAG>|<描述>"`

use std::fmt;
use std::io::Write;
use std::str::FromStr;

use crate::error::{Result, SentinelError};

/// 运动指令
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Motion {
    #[default]
    Forward,
    Backward,
    Stop,
    TurnLeft,
    TurnRight,
}

impl Motion {
    pub fn as_str(&self) -> &'static str {
        match self {
            Motion::Forward => "FORWARD",
            Motion::Backward => "BACKWARD",
            Motion::Stop => "STOP",
            Motion::TurnLeft => "TURN_LEFT",
            Motion::TurnRight => "TURN_RIGHT",
        }
    }
}

impl fmt::Display for Motion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Motion {
    type Err = SentinelError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "FORWARD" => Ok(Motion::Forward),
            "BACKWARD" => Ok(Motion::Backward),
            "STOP" => Ok(Motion::Stop),
            "TURN_LEFT" => Ok(Motion::TurnLeft),
            "TURN_RIGHT" => Ok(Motion::TurnRight),
            other => Err(SentinelError::Protocol(format!("unknown motion `{other}`"))),
        }
    }
}

/// 语音标签: ALERT 为紧急, WARN 为警告
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpeechTag {
    Alert,
    Warn,
}

impl SpeechTag {
    pub fn as_str(&self) -> &'static str {
        match self {
            SpeechTag::Alert => "ALERT",
            SpeechTag::Warn => "WARN",
        }
    }
}

/// 待发送的语音指令 (只投递一次)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Speech {
    pub tag: SpeechTag,
    pub text: String,
}

impl Speech {
    pub fn new(tag: SpeechTag, text: impl Into<String>) -> Self {
        Self {
            tag,
            text: text.into(),
        }
    }
}

impl fmt::Display for Speech {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}|{}", self.tag.as_str(), self.text)
    }
}

/// 一次发送给机器人的指令对
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Command {
    pub motion: Motion,
    pub speech: Option<Speech>,
}

impl Command {
    /// 编码为一行: `MOTION|TAG|text\n` 或 `MOTION|\n`
    pub fn to_line(&self) -> String {
        match &self.speech {
            Some(speech) => format!("{}|{}\n", self.motion, speech),
            None => format!("{}|\n", self.motion),
        }
    }

    /// 解析机器人收到的一行指令
    pub fn parse_line(line: &str) -> Result<Self> {
        let line = line.trim_end_matches(['\r', '\n']);
        let (motion, rest) = line
            .split_once('|')
            .ok_or_else(|| SentinelError::Protocol(format!("missing separator in `{line}`")))?;
        let motion = motion.parse()?;

        if rest.is_empty() {
            return Ok(Self {
                motion,
                speech: None,
            });
        }

        let (tag, text) = rest
            .split_once('|')
            .ok_or_else(|| SentinelError::Protocol(format!("speech without tag `{rest}`")))?;
        let tag = match tag {
            "ALERT" => SpeechTag::Alert,
            "WARN" => SpeechTag::Warn,
            other => {
                return Err(SentinelError::Protocol(format!(
                    "unknown speech tag `{other}`"
                )))
            }
        };

        Ok(Self {
            motion,
            speech: Some(Speech::new(tag, text)),
        })
    }
}

// ========== 帧封装 ==========

/// 读取结果
#[derive(Debug)]
pub enum FrameRead {
    /// 完整的一帧负载
    Payload(Vec<u8>),
    /// 对端关闭 (含半途断开)
    Closed,
}

/// 写入一帧: 4字节大端长度 + 负载
pub fn write_frame<W: Write>(writer: &mut W, payload: &[u8]) -> Result<()> {
    let len = u32::try_from(payload.len()).map_err(|_| SentinelError::FrameTooLarge {
        len: payload.len(),
        max: u32::MAX as usize,
    })?;
    writer.write_all(&len.to_be_bytes())?;
    writer.write_all(payload)?;
    Ok(())
}

/// 读取一帧
///
/// `read_full` 负责"读满n字节",返回 `Ok(false)` 表示对端在读满前关闭。
/// 超出 `max_len` 的长度前缀视为协议错误 (无法重新同步)。
pub fn read_frame_with<F>(max_len: usize, mut read_full: F) -> Result<FrameRead>
where
    F: FnMut(&mut [u8]) -> std::io::Result<bool>,
{
    let mut header = [0u8; 4];
    if !read_full(&mut header)? {
        return Ok(FrameRead::Closed);
    }

    let len = u32::from_be_bytes(header) as usize;
    if len > max_len {
        return Err(SentinelError::FrameTooLarge { len, max: max_len });
    }

    let mut payload = vec![0u8; len];
    if !read_full(&mut payload)? {
        return Ok(FrameRead::Closed);
    }
    Ok(FrameRead::Payload(payload))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Cursor, Read};

    /// 阻塞读取一帧, 读到末尾视为对端关闭
    fn read_frame<R: Read>(reader: &mut R, max_len: usize) -> Result<FrameRead> {
        read_frame_with(max_len, |buf| match reader.read_exact(buf) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => Ok(false),
            Err(e) => Err(e),
        })
    }

    #[test]
    fn test_command_line_without_speech() {
        let cmd = Command {
            motion: Motion::TurnLeft,
            speech: None,
        };
        assert_eq!(cmd.to_line(), "TURN_LEFT|\n");
        assert_eq!(Command::parse_line("TURN_LEFT|\n").unwrap(), cmd);
    }

    #[test]
    fn test_command_line_with_speech() {
        let cmd = Command {
            motion: Motion::Stop,
            speech: Some(Speech::new(SpeechTag::Alert, "Fire detected!")),
        };
        let line = cmd.to_line();
        assert_eq!(line, "STOP|ALERT|Fire detected!\n");
        assert_eq!(Command::parse_line(&line).unwrap(), cmd);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(Command::parse_line("JUMP|").is_err());
        assert!(Command::parse_line("STOP").is_err());
        assert!(Command::parse_line("STOP|SHOUT|hello").is_err());
    }

    #[test]
    fn test_read_frame_sequence_then_close() {
        let mut wire = Vec::new();
        write_frame(&mut wire, b"abc").unwrap();
        write_frame(&mut wire, b"").unwrap();
        let mut cursor = Cursor::new(wire);

        match read_frame(&mut cursor, 1024).unwrap() {
            FrameRead::Payload(p) => assert_eq!(p, b"abc"),
            other => panic!("unexpected {:?}", other),
        }
        match read_frame(&mut cursor, 1024).unwrap() {
            FrameRead::Payload(p) => assert!(p.is_empty()),
            other => panic!("unexpected {:?}", other),
        }
        assert!(matches!(
            read_frame(&mut cursor, 1024).unwrap(),
            FrameRead::Closed
        ));
    }

    #[test]
    fn test_short_payload_is_closed() {
        // 声明10字节但只有4字节
        let mut wire = 10u32.to_be_bytes().to_vec();
        wire.extend_from_slice(b"abcd");
        let mut cursor = Cursor::new(wire);
        assert!(matches!(
            read_frame(&mut cursor, 1024).unwrap(),
            FrameRead::Closed
        ));
    }

    #[test]
    fn test_oversize_length_rejected() {
        let wire = (2048u32).to_be_bytes().to_vec();
        let mut cursor = Cursor::new(wire);
        assert!(matches!(
            read_frame(&mut cursor, 1024),
            Err(SentinelError::FrameTooLarge { len: 2048, max: 1024 })
        ));
    }
}
