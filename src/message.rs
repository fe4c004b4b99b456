//! 제어 메시지 정의
//!
//! 명령과 응답은 모두 신뢰 패킷(seq 0)의 페이로드로 오가는 ASCII 텍스트다.
//!
//! ```text
//! CONNECT
//! HANDLE [name]
//! FILE_LIST | FILELIST
//! SIZE <name>
//! REQUEST <name> <offset> <length> <seq>
//! ACK <name>
//! EXIT
//! ```
//!
//! 명령은 줄바꿈으로 끝난다. `CONNECT`만은 줄바꿈 없이 와도 받아들인다.
//! 파일 이름에는 공백을 쓸 수 없다.

use std::fmt;
use std::str::FromStr;

use crate::{Error, Result, WELCOME_MESSAGE};

/// 에러 응답 접두어
pub const ERROR_PREFIX: &str = "ERR ";

/// 클라이언트 → 서버 명령
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// 연결 시작
    Connect,

    /// 클라이언트 등록 (선택)
    Handle(Option<String>),

    /// 파일 목록 요청
    FileList,

    /// 파일 크기 요청
    Size(String),

    /// 바이트 범위 요청
    Request {
        name: String,
        offset: u64,
        length: u64,
        seq: u32,
    },

    /// 다운로드 완료 알림
    Ack(String),

    /// 연결 종료
    Exit,
}

impl Command {
    /// 한 줄 파싱 (앞뒤 공백/줄바꿈 무시)
    pub fn parse(line: &str) -> Result<Command> {
        let mut parts = line.split_whitespace();
        let verb = parts
            .next()
            .ok_or_else(|| Error::Protocol("빈 명령".into()))?;

        let command = match verb {
            "CONNECT" => Command::Connect,
            "HANDLE" => Command::Handle(parts.next().map(str::to_string)),
            "FILE_LIST" | "FILELIST" => Command::FileList,
            "SIZE" => Command::Size(required(&mut parts, verb, "name")?.to_string()),
            "REQUEST" => Command::Request {
                name: required(&mut parts, verb, "name")?.to_string(),
                offset: number(&mut parts, verb, "offset")?,
                length: number(&mut parts, verb, "length")?,
                seq: number(&mut parts, verb, "seq")?,
            },
            "ACK" => Command::Ack(required(&mut parts, verb, "name")?.to_string()),
            "EXIT" => Command::Exit,
            other => return Err(Error::Protocol(format!("알 수 없는 명령: {}", other))),
        };

        Ok(command)
    }

    /// 와이어 표현 (줄바꿈 포함)
    pub fn to_line(&self) -> String {
        format!("{}\n", self)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Command::Connect => "CONNECT",
            Command::Handle(_) => "HANDLE",
            Command::FileList => "FILE_LIST",
            Command::Size(_) => "SIZE",
            Command::Request { .. } => "REQUEST",
            Command::Ack(_) => "ACK",
            Command::Exit => "EXIT",
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::Handle(Some(handle)) => write!(f, "HANDLE {}", handle),
            Command::Size(name) => write!(f, "SIZE {}", name),
            Command::Request {
                name,
                offset,
                length,
                seq,
            } => write!(f, "REQUEST {} {} {} {}", name, offset, length, seq),
            Command::Ack(name) => write!(f, "ACK {}", name),
            other => f.write_str(other.name()),
        }
    }
}

impl FromStr for Command {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Command::parse(s)
    }
}

fn required<'a>(
    parts: &mut impl Iterator<Item = &'a str>,
    verb: &str,
    field: &str,
) -> Result<&'a str> {
    parts
        .next()
        .ok_or_else(|| Error::Protocol(format!("{}: {} 누락", verb, field)))
}

fn number<'a, T: FromStr>(
    parts: &mut impl Iterator<Item = &'a str>,
    verb: &str,
    field: &str,
) -> Result<T> {
    let raw = required(parts, verb, field)?;
    raw.parse()
        .map_err(|_| Error::Protocol(format!("{}: 잘못된 {} '{}'", verb, field, raw)))
}

/// 서버 → 클라이언트 응답
///
/// 응답에는 종류 표시가 없으므로 클라이언트는 보낸 명령에 맞춰 해석한다.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Welcome,

    /// 목록 줄 (`"<name> <size>MB"`)
    Listing(Vec<String>),

    Size(u64),

    Error(String),
}

impl Reply {
    /// 페이로드 텍스트
    pub fn to_text(&self) -> String {
        match self {
            Reply::Welcome => WELCOME_MESSAGE.to_string(),
            Reply::Listing(lines) => lines.join("\n"),
            Reply::Size(size) => size.to_string(),
            Reply::Error(msg) => format!("{}{}", ERROR_PREFIX, msg),
        }
    }

    /// 에러 응답이면 메시지 추출
    fn error_message(text: &str) -> Option<&str> {
        text.strip_prefix(ERROR_PREFIX).map(str::trim)
    }

    /// CONNECT 응답 해석
    pub fn parse_welcome(text: &str) -> Result<Reply> {
        if let Some(msg) = Self::error_message(text) {
            return Err(Error::Protocol(msg.to_string()));
        }
        if text.trim_end() != WELCOME_MESSAGE.trim_end() {
            return Err(Error::Protocol(format!("예상 밖 환영 메시지: {:?}", text)));
        }
        Ok(Reply::Welcome)
    }

    /// FILE_LIST 응답 해석
    pub fn parse_listing(text: &str) -> Result<Reply> {
        if let Some(msg) = Self::error_message(text) {
            return Err(Error::Protocol(msg.to_string()));
        }
        let lines = text
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect();
        Ok(Reply::Listing(lines))
    }

    /// SIZE 응답 해석, 없는 파일이면 [`Error::FileNotFound`]
    pub fn parse_size(name: &str, text: &str) -> Result<Reply> {
        if Self::error_message(text).is_some() {
            return Err(Error::FileNotFound(name.to_string()));
        }
        text.trim()
            .parse()
            .map(Reply::Size)
            .map_err(|_| Error::Protocol(format!("잘못된 크기 응답: {:?}", text)))
    }

    /// 목록에서 파일 이름만 (각 줄의 첫 토큰)
    pub fn file_names(&self) -> Vec<String> {
        match self {
            Reply::Listing(lines) => lines
                .iter()
                .filter_map(|line| line.split_whitespace().next())
                .map(str::to_string)
                .collect(),
            _ => Vec::new(),
        }
    }
}

/// 피어별 명령 줄 버퍼
///
/// 여러 패킷에 나뉘어 온 명령을 줄 단위로 모은다.
#[derive(Debug, Default, Clone)]
pub struct LineBuffer {
    pending: String,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// 텍스트 추가 후 완성된 줄 반환
    pub fn push(&mut self, text: &str) -> Vec<String> {
        self.pending.push_str(text);

        let mut lines = Vec::new();
        while let Some(pos) = self.pending.find('\n') {
            let line: String = self.pending.drain(..=pos).collect();
            let line = line.trim();
            if !line.is_empty() {
                lines.push(line.to_string());
            }
        }

        // 줄바꿈 없는 CONNECT
        if self.pending.trim() == "CONNECT" {
            self.pending.clear();
            lines.push("CONNECT".to_string());
        }

        lines
    }

    /// 남은 미완성 텍스트 폐기
    pub fn clear(&mut self) {
        self.pending.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_commands() {
        assert_eq!(Command::parse("CONNECT").unwrap(), Command::Connect);
        assert_eq!(Command::parse("FILELIST\n").unwrap(), Command::FileList);
        assert_eq!(Command::parse("FILE_LIST").unwrap(), Command::FileList);
        assert_eq!(
            Command::parse("SIZE a.bin\n").unwrap(),
            Command::Size("a.bin".into())
        );
        assert_eq!(
            Command::parse("REQUEST a.bin 1024 2048 7").unwrap(),
            Command::Request {
                name: "a.bin".into(),
                offset: 1024,
                length: 2048,
                seq: 7,
            }
        );
        assert_eq!(Command::parse("HANDLE").unwrap(), Command::Handle(None));
        assert_eq!(Command::parse("EXIT\r\n").unwrap(), Command::Exit);
    }

    #[test]
    fn test_reject_malformed() {
        assert!(Command::parse("").is_err());
        assert!(Command::parse("SIZE").is_err());
        assert!(Command::parse("REQUEST a.bin x 10 0").is_err());
        assert!(Command::parse("REQUEST a.bin 0 10").is_err());
        assert!(matches!(Command::parse("DELETE a"), Err(Error::Protocol(_))));
    }

    #[test]
    fn test_line_format() {
        let cmd = Command::Request {
            name: "f".into(),
            offset: 0,
            length: 10,
            seq: 0,
        };
        assert_eq!(cmd.to_line(), "REQUEST f 0 10 0\n");
        assert_eq!(cmd.to_line().parse::<Command>().unwrap(), cmd);
        assert_eq!(Command::Handle(Some("bob".into())).to_line(), "HANDLE bob\n");
    }

    #[test]
    fn test_replies() {
        assert_eq!(Reply::parse_welcome(WELCOME_MESSAGE).unwrap(), Reply::Welcome);
        assert!(Reply::parse_welcome("hello").is_err());
        assert_eq!(Reply::parse_size("a", "10000").unwrap(), Reply::Size(10_000));
        assert!(matches!(
            Reply::parse_size("a", &Reply::Error("not found".into()).to_text()),
            Err(Error::FileNotFound(name)) if name == "a"
        ));

        let listing = Reply::parse_listing("a.bin 0.01MB\nb.txt 2.00MB\n").unwrap();
        assert_eq!(listing.file_names(), vec!["a.bin", "b.txt"]);
        assert_eq!(Reply::parse_listing("").unwrap().file_names().len(), 0);
    }

    #[test]
    fn test_line_buffer() {
        let mut buf = LineBuffer::new();
        assert_eq!(buf.push("CONNECT"), vec!["CONNECT"]);
        assert!(buf.push("SIZE a").is_empty());
        assert_eq!(buf.push(".bin\nFILE_LIST\nEX"), vec!["SIZE a.bin", "FILE_LIST"]);
        assert!(!buf.is_empty());
        assert_eq!(buf.push("IT\n"), vec!["EXIT"]);
        assert!(buf.is_empty());
    }
}
