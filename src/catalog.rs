//! 파일 카탈로그
//!
//! 서버 폴더의 일반 파일 목록, 크기 조회, 바이트 범위 읽기.

use std::io::SeekFrom;
use std::path::{Path, PathBuf};

use bytes::Bytes;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tracing::debug;

use crate::{Error, Result};

const MB: f64 = 1024.0 * 1024.0;

/// 카탈로그 항목
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
    pub name: String,
    pub size: u64,
}

impl FileEntry {
    /// 목록 줄 (`"<name> <size>MB"`)
    pub fn listing_line(&self) -> String {
        format!("{} {:.2}MB", self.name, self.size as f64 / MB)
    }
}

/// 서버 파일 카탈로그
#[derive(Debug, Clone)]
pub struct Catalog {
    folder: PathBuf,
}

impl Catalog {
    pub fn new(folder: impl Into<PathBuf>) -> Self {
        Self {
            folder: folder.into(),
        }
    }

    pub fn folder(&self) -> &Path {
        &self.folder
    }

    /// 폴더의 일반 파일 (이름순)
    pub async fn scan(&self) -> Result<Vec<FileEntry>> {
        let mut entries = Vec::new();
        let mut dir = tokio::fs::read_dir(&self.folder).await?;

        while let Some(entry) = dir.next_entry().await? {
            let metadata = entry.metadata().await?;
            if !metadata.is_file() {
                continue;
            }
            // UTF-8이 아니거나 공백이 있는 이름은 명령으로 요청할 수 없음
            let name = match entry.file_name().into_string() {
                Ok(name) if !name.contains(char::is_whitespace) => name,
                _ => continue,
            };
            entries.push(FileEntry {
                name,
                size: metadata.len(),
            });
        }

        entries.sort_by(|a, b| a.name.cmp(&b.name));
        debug!("카탈로그 스캔: {} 파일", entries.len());
        Ok(entries)
    }

    /// 목록 응답 줄
    pub async fn listing(&self) -> Result<Vec<String>> {
        Ok(self.scan().await?.iter().map(FileEntry::listing_line).collect())
    }

    /// 목록을 파일로 기록
    pub async fn write_manifest(&self, path: impl AsRef<Path>) -> Result<usize> {
        let lines = self.listing().await?;
        let mut text = lines.join("\n");
        if !text.is_empty() {
            text.push('\n');
        }
        tokio::fs::write(path, text).await?;
        Ok(lines.len())
    }

    /// 이름을 폴더 안의 경로로 변환
    ///
    /// 경로 구분자, `..`, 빈 이름은 거부한다.
    pub fn resolve(&self, name: &str) -> Result<PathBuf> {
        let invalid = name.is_empty()
            || name == "."
            || name == ".."
            || name.contains(['/', '\\'])
            || name.contains('\0');
        if invalid {
            return Err(Error::FileNotFound(name.to_string()));
        }
        Ok(self.folder.join(name))
    }

    /// 파일 크기
    pub async fn size_of(&self, name: &str) -> Result<u64> {
        let path = self.resolve(name)?;
        match tokio::fs::metadata(&path).await {
            Ok(metadata) if metadata.is_file() => Ok(metadata.len()),
            Ok(_) => Err(Error::FileNotFound(name.to_string())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(Error::FileNotFound(name.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// `[offset, offset + len)` 읽기 (파일 끝에서 잘림)
    pub async fn read_range(&self, name: &str, offset: u64, len: u64) -> Result<Bytes> {
        let size = self.size_of(name).await?;
        let start = offset.min(size);
        let end = offset.saturating_add(len).min(size);
        let want = usize::try_from(end - start)
            .map_err(|_| Error::Protocol(format!("범위가 너무 큼: {} bytes", end - start)))?;

        let mut file = tokio::fs::File::open(self.resolve(name)?).await?;
        file.seek(SeekFrom::Start(start)).await?;

        let mut buf = vec![0u8; want];
        file.read_exact(&mut buf).await?;
        Ok(Bytes::from(buf))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn catalog_with(files: &[(&str, &[u8])]) -> (tempfile::TempDir, Catalog) {
        let dir = tempfile::tempdir().unwrap();
        for (name, data) in files {
            tokio::fs::write(dir.path().join(name), data).await.unwrap();
        }
        tokio::fs::create_dir(dir.path().join("nested")).await.unwrap();
        let catalog = Catalog::new(dir.path());
        (dir, catalog)
    }

    #[tokio::test]
    async fn test_scan_lists_regular_files() {
        let big = vec![7u8; 2 * 1024 * 1024];
        let (_dir, catalog) = catalog_with(&[("b.bin", &big), ("a.txt", b"hello")]).await;

        let entries = catalog.scan().await.unwrap();
        assert_eq!(
            entries.iter().map(|e| e.name.as_str()).collect::<Vec<_>>(),
            vec!["a.txt", "b.bin"]
        );
        assert_eq!(
            catalog.listing().await.unwrap(),
            vec!["a.txt 0.00MB".to_string(), "b.bin 2.00MB".to_string()]
        );
    }

    #[tokio::test]
    async fn test_read_range_clamps_to_end() {
        let (_dir, catalog) = catalog_with(&[("f", b"0123456789")]).await;

        assert_eq!(catalog.size_of("f").await.unwrap(), 10);
        assert_eq!(catalog.read_range("f", 2, 3).await.unwrap().as_ref(), b"234");
        assert_eq!(catalog.read_range("f", 8, 100).await.unwrap().as_ref(), b"89");
        assert!(catalog.read_range("f", 20, 5).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_rejects_unsafe_names() {
        let (_dir, catalog) = catalog_with(&[("f", b"x")]).await;

        for name in ["", "..", "../f", "nested/f", "nested"] {
            assert!(
                matches!(catalog.size_of(name).await, Err(Error::FileNotFound(_))),
                "{:?} accepted",
                name
            );
        }
        assert!(matches!(
            catalog.size_of("missing").await,
            Err(Error::FileNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_manifest() {
        let (dir, catalog) = catalog_with(&[("a", b"1"), ("b", b"2")]).await;
        let path = dir.path().join("nested").join("filelist.txt");
        assert_eq!(catalog.write_manifest(&path).await.unwrap(), 2);
        let text = tokio::fs::read_to_string(&path).await.unwrap();
        assert_eq!(text, "a 0.00MB\nb 0.00MB\n");
    }
}
