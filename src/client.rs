//! 클라이언트 (다운로드측)
//!
//! - 제어 세션으로 CONNECT, 목록, 크기 조회
//! - 파일을 바이트 범위로 나눠 범위마다 워커와 소켓 하나씩 사용
//! - 범위 수신이 시간 초과되면 받지 못한 뒷부분만 다시 요청

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use parking_lot::RwLock;
use tracing::{debug, info, warn};

use crate::catalog::Catalog;
use crate::message::{Command, Reply};
use crate::receiver::SlidingWindowReceiver;
use crate::reorder::ReorderBuffer;
use crate::session::{Session, Shutdown};
use crate::stats::TransferStats;
use crate::{Config, Error, Result};

/// EXIT 전송 시도 횟수
const EXIT_ATTEMPTS: u32 = 3;

/// 제어 명령 전송 (seq 0, ACK 1 기대)
async fn send_command(session: &mut Session, server: SocketAddr, command: &Command) -> Result<()> {
    debug!("명령 전송: {}", command);
    match session
        .send_payload(server, 0, command.to_line().as_bytes())
        .await?
    {
        1 => Ok(()),
        ack => Err(Error::Protocol(format!(
            "{} 명령에 예상 밖 ACK {}",
            command.name(),
            ack
        ))),
    }
}

/// 파일을 `parts`개 범위로 분할 (마지막 범위가 나머지 포함)
pub fn split_ranges(size: u64, parts: usize) -> Vec<(u64, u64)> {
    if size == 0 {
        return Vec::new();
    }
    let parts = (parts.max(1) as u64).min(size);
    let base = size / parts;

    (0..parts)
        .map(|i| {
            let offset = i * base;
            let len = if i == parts - 1 { size - offset } else { base };
            (offset, len)
        })
        .collect()
}

/// 범위 워커가 공유하는 상태
#[derive(Clone)]
struct RangeContext {
    server: SocketAddr,
    config: Config,
    shutdown: Shutdown,
    stats: Arc<RwLock<TransferStats>>,
    bind_ip: IpAddr,
}

impl RangeContext {
    /// 범위 하나 다운로드 (재시도 포함)
    async fn fetch_range(self, name: String, offset: u64, length: u64) -> Result<Bytes> {
        let mut session = Session::bind(
            SocketAddr::new(self.bind_ip, 0),
            self.config.clone(),
            self.shutdown.clone(),
        )
        .await?;

        let mut buf = BytesMut::with_capacity(self.config.capacity_hint(length));
        let mut next_seq = 0u32;
        let mut retries = 0u32;

        let result = loop {
            let received = buf.len() as u64;
            let remaining = length.saturating_sub(received);
            if remaining == 0 {
                break Ok(());
            }

            let command = Command::Request {
                name: name.clone(),
                offset: offset + received,
                length: remaining,
                seq: next_seq,
            };

            match fetch_once(&mut session, self.server, &command, remaining, &mut buf, &mut next_seq)
                .await
            {
                Ok(()) => {}
                Err(e) if !e.is_fatal() && retries < self.config.max_retries => {
                    retries += 1;
                    warn!(
                        "{} [{}..+{}) {} bytes 수신 후 재시도 {}/{}: {}",
                        name,
                        offset,
                        length,
                        buf.len(),
                        retries,
                        self.config.max_retries,
                        e
                    );
                }
                Err(e) => break Err(e),
            }
        };

        self.stats.write().merge(session.stats());
        result?;

        debug!("{} [{}..+{}) 수신 완료", name, offset, length);
        Ok(buf.freeze())
    }
}

/// REQUEST 한 번 보내고 받을 수 있는 만큼 수신
async fn fetch_once(
    session: &mut Session,
    server: SocketAddr,
    command: &Command,
    remaining: u64,
    buf: &mut BytesMut,
    next_seq: &mut u32,
) -> Result<()> {
    send_command(session, server, command).await?;

    let mut receiver = SlidingWindowReceiver::new(session, *next_seq).with_goal(remaining);
    let result = loop {
        match receiver.next().await {
            None => break Ok(()),
            Some(Ok((_, payload))) => {
                buf.extend_from_slice(&payload);
                *next_seq = receiver.expected();
            }
            Some(Err(e)) => break Err(e),
        }
    };
    let peer = receiver.peer();

    // 이 요청을 처리한 서버 워커의 늦은 패킷은 다음 시도에 섞이지 않게
    if let Some(peer) = peer {
        session.retire_peer(peer);
    }
    result
}

/// 파일 클라이언트
pub struct Client {
    session: Session,
    server: SocketAddr,
    config: Config,
    stats: Arc<RwLock<TransferStats>>,
}

impl Client {
    /// 서버 연결 (CONNECT → 환영 메시지)
    pub async fn connect(server: SocketAddr, config: Config, shutdown: Shutdown) -> Result<Self> {
        config.validate()?;

        let bind_ip = match server.ip() {
            IpAddr::V4(ip) if ip.is_loopback() => IpAddr::V4(Ipv4Addr::LOCALHOST),
            IpAddr::V4(_) => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            IpAddr::V6(ip) if ip.is_loopback() => IpAddr::V6(Ipv6Addr::LOCALHOST),
            IpAddr::V6(_) => IpAddr::V6(Ipv6Addr::UNSPECIFIED),
        };
        let session = Session::bind(SocketAddr::new(bind_ip, 0), config.clone(), shutdown).await?;

        let mut client = Self {
            session,
            server,
            config,
            stats: Arc::new(RwLock::new(TransferStats::new())),
        };

        let text = client.request_reply(&Command::Connect).await?;
        Reply::parse_welcome(&text)?;
        info!("서버 연결: {}", server);

        Ok(client)
    }

    pub fn server(&self) -> SocketAddr {
        self.server
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn shutdown_handle(&self) -> Shutdown {
        self.session.shutdown().clone()
    }

    /// 제어 세션과 범위 워커 통계 합계
    pub fn stats(&self) -> TransferStats {
        let mut stats = self.stats.read().clone();
        stats.merge(self.session.stats());
        stats
    }

    /// 명령 전송 후 응답 텍스트 수신
    async fn request_reply(&mut self, command: &Command) -> Result<String> {
        send_command(&mut self.session, self.server, command).await?;

        let received = self
            .session
            .recv_reliable(0, &mut ReorderBuffer::new())
            .await?;
        // 같은 응답의 재전송을 다음 응답으로 오인하지 않게
        self.session.retire_peer(received.peer);

        String::from_utf8(received.payload.to_vec())
            .map_err(|_| Error::Protocol(format!("{} 응답이 UTF-8이 아님", command.name())))
    }

    /// 클라이언트 등록
    pub async fn register(&mut self, handle: Option<&str>) -> Result<()> {
        let command = Command::Handle(handle.map(str::to_string));
        send_command(&mut self.session, self.server, &command).await
    }

    /// 서버 파일 이름 목록
    pub async fn file_list(&mut self) -> Result<Vec<String>> {
        let text = self.request_reply(&Command::FileList).await?;
        Ok(Reply::parse_listing(&text)?.file_names())
    }

    /// 파일 크기
    pub async fn size(&mut self, name: &str) -> Result<u64> {
        let text = self.request_reply(&Command::Size(name.to_string())).await?;
        match Reply::parse_size(name, &text)? {
            Reply::Size(size) => Ok(size),
            other => Err(Error::Protocol(format!("예상 밖 응답: {:?}", other))),
        }
    }

    fn range_context(&self) -> Result<RangeContext> {
        Ok(RangeContext {
            server: self.server,
            config: self.config.clone(),
            shutdown: self.session.shutdown().clone(),
            stats: self.stats.clone(),
            bind_ip: self.session.local_addr()?.ip(),
        })
    }

    /// 바이트 범위 하나 다운로드 (워커 소켓 사용, 재시도 포함)
    pub async fn download_range(&self, name: &str, offset: u64, length: u64) -> Result<Bytes> {
        self.range_context()?
            .fetch_range(name.to_string(), offset, length)
            .await
    }

    /// 파일 전체 다운로드
    ///
    /// `parallel_chunks`개 범위를 동시에 받고 오프셋 순으로 합친다.
    pub async fn download(&mut self, name: &str) -> Result<Bytes> {
        let size = self.size(name).await?;
        let ranges = split_ranges(size, self.config.parallel_chunks);
        info!(
            "다운로드 시작: {} ({} bytes, {} 범위)",
            name,
            size,
            ranges.len()
        );

        let ctx = self.range_context()?;
        let handles: Vec<_> = ranges
            .iter()
            .map(|&(offset, length)| {
                tokio::spawn(ctx.clone().fetch_range(name.to_string(), offset, length))
            })
            .collect();

        let mut data = BytesMut::with_capacity(self.config.capacity_hint(size));
        let mut failure: Option<Error> = None;
        for handle in handles {
            match handle.await {
                Ok(Ok(part)) => data.extend_from_slice(&part),
                Ok(Err(e)) => {
                    failure.get_or_insert(e);
                }
                Err(e) => {
                    failure.get_or_insert(Error::Io(std::io::Error::new(
                        std::io::ErrorKind::Other,
                        e,
                    )));
                }
            }
        }

        if let Some(e) = failure {
            warn!("다운로드 실패: {}: {}", name, e);
            return Err(Error::TransferFailed {
                name: name.to_string(),
                reason: e.failure_reason(),
            });
        }
        if data.len() as u64 != size {
            return Err(Error::Protocol(format!(
                "{}: {} bytes 수신, {} bytes 예상",
                name,
                data.len(),
                size
            )));
        }

        info!("다운로드 완료: {} ({} bytes)", name, size);
        Ok(data.freeze())
    }

    /// 출력 폴더에 저장
    pub async fn save(&self, name: &str, data: &[u8]) -> Result<PathBuf> {
        tokio::fs::create_dir_all(&self.config.output_dir).await?;
        let path = Catalog::new(&self.config.output_dir).resolve(name)?;
        tokio::fs::write(&path, data).await?;
        Ok(path)
    }

    /// 다운로드 완료 알림
    pub async fn ack(&mut self, name: &str) -> Result<()> {
        send_command(&mut self.session, self.server, &Command::Ack(name.to_string())).await
    }

    /// 다운로드, 저장, 완료 알림
    pub async fn fetch(&mut self, name: &str) -> Result<PathBuf> {
        let data = self.download(name).await?;
        let path = self.save(name, &data).await?;
        self.ack(name).await?;
        info!("저장 완료: {}", path.display());
        Ok(path)
    }

    /// 연결 종료 (EXIT, 취소 중에도 시도)
    pub async fn exit(mut self) -> Result<()> {
        let packet = self
            .session
            .codec()
            .encode(0, Command::Exit.to_line().as_bytes())?;
        if self
            .session
            .send_best_effort(self.server, &packet, EXIT_ATTEMPTS)
            .await
        {
            info!("연결 종료: {}", self.server);
            Ok(())
        } else {
            Err(Error::Timeout {
                attempts: EXIT_ATTEMPTS,
            })
        }
    }
}
