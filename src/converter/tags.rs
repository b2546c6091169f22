use anyhow::{anyhow, Result};
use lofty::{
    Accessor, ItemKey, MimeType, Picture, PictureType, Probe, Tag, TagExt, TaggedFileExt,
};
use std::borrow::Cow;
use std::collections::HashMap;
use std::path::Path;

use super::ffmpeg::{self, ToolConfig};

/// 按容器检测到的标签方案。读写都通过方案分派，而不是在运行时
/// 做类型探查。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TagScheme {
    /// ID3 (mp3、wav)
    Id3,
    /// MP4 atoms (m4a、aac)
    Mp4,
    /// Vorbis comments (flac、ogg、opus)
    Vorbis,
    /// ASF (wma)。lofty 不支持该容器：读取走 ffprobe 容器标签，写入不可用。
    Asf,
}

impl TagScheme {
    pub fn detect(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "mp3" | "wav" => Some(TagScheme::Id3),
            "m4a" | "aac" | "mp4" => Some(TagScheme::Mp4),
            "flac" | "ogg" | "opus" => Some(TagScheme::Vorbis),
            "wma" => Some(TagScheme::Asf),
            _ => None,
        }
    }
}

/// 嵌入式封面，原样携带的二进制数据 + MIME 类型，不做任何转码或缩放。
#[derive(Debug, Clone, PartialEq)]
pub struct CoverArt {
    pub data: Vec<u8>,
    pub mime: String,
}

/// 归一化的元数据记录。
///
/// 缺失的字段保持 `None` 而不是空字符串，写入时直接跳过，
/// 避免用空白覆盖目标文件的既有内容。
#[derive(Debug, Default, Clone, PartialEq)]
pub struct Metadata {
    pub title: Option<String>,
    pub artist: Option<String>,
    pub album: Option<String>,
    pub album_artist: Option<String>,
    pub track_number: Option<u32>,
    pub disc_number: Option<u32>,
    pub year: Option<u32>,
    pub genre: Option<String>,
    pub comment: Option<String>,
    pub cover_art: Option<CoverArt>,
}

impl Metadata {
    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.artist.is_none()
            && self.album.is_none()
            && self.album_artist.is_none()
            && self.track_number.is_none()
            && self.disc_number.is_none()
            && self.year.is_none()
            && self.genre.is_none()
            && self.comment.is_none()
            && self.cover_art.is_none()
    }
}

/// 从源文件读取元数据。
///
/// 标签全部缺失是成功（返回全空的记录），只有容器完全无法识别
/// 或无法解析时才返回 `[E_TAG_READ]`。
pub fn read_metadata(path: &Path, tools: &ToolConfig) -> Result<Metadata> {
    let scheme = TagScheme::detect(path)
        .ok_or_else(|| anyhow!("[E_TAG_READ] 无法识别的容器格式: {}", path.display()))?;

    match scheme {
        TagScheme::Asf => {
            let tags = ffmpeg::read_format_tags(path, tools)?;
            Ok(metadata_from_format_tags(&tags))
        }
        _ => read_via_lofty(path),
    }
}

/// 把元数据写入最终输出文件。
///
/// 目标方案没有对应映射的字段由标签库在保存时静默丢弃；
/// 只有目标容器完全不可写时才返回 `[E_TAG_WRITE]`。
pub fn write_metadata(path: &Path, metadata: &Metadata) -> Result<()> {
    let scheme = TagScheme::detect(path)
        .ok_or_else(|| anyhow!("[E_TAG_WRITE] 无法识别的容器格式: {}", path.display()))?;

    if scheme == TagScheme::Asf {
        return Err(anyhow!(
            "[E_TAG_WRITE] 目标容器不支持标签写入 (ASF/WMA): {}",
            path.display()
        ));
    }

    if metadata.is_empty() {
        // 源文件没有任何元数据，没有可保留的内容
        return Ok(());
    }

    let mut tagged_file = Probe::open(path)
        .map_err(|e| anyhow!("[E_TAG_WRITE] 打开输出文件失败: {}: {e}", path.display()))?
        .read()
        .map_err(|e| anyhow!("[E_TAG_WRITE] 解析输出文件失败: {}: {e}", path.display()))?;

    let tag = match tagged_file.primary_tag_mut() {
        Some(tag) => tag,
        None => {
            let tag_type = tagged_file.primary_tag_type();
            tagged_file.insert_tag(Tag::new(tag_type));
            tagged_file
                .primary_tag_mut()
                .ok_or_else(|| anyhow!("[E_TAG_WRITE] 无法创建标签: {}", path.display()))?
        }
    };

    apply_to_tag(tag, metadata);

    tag.save_to_path(path)
        .map_err(|e| anyhow!("[E_TAG_WRITE] 保存标签失败: {}: {e}", path.display()))?;
    Ok(())
}

fn read_via_lofty(path: &Path) -> Result<Metadata> {
    let tagged_file = lofty::read_from_path(path)
        .map_err(|e| anyhow!("[E_TAG_READ] 读取标签失败: {}: {e}", path.display()))?;

    let tag = tagged_file.primary_tag().or_else(|| tagged_file.first_tag());
    let Some(tag) = tag else {
        return Ok(Metadata::default());
    };

    let mut metadata = Metadata {
        title: non_empty(tag.title()),
        artist: non_empty(tag.artist()),
        album: non_empty(tag.album()),
        album_artist: tag
            .get_string(&ItemKey::AlbumArtist)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(ToOwned::to_owned),
        track_number: tag.track(),
        disc_number: tag.disk(),
        year: tag.year(),
        genre: non_empty(tag.genre()),
        comment: non_empty(tag.comment()),
        cover_art: None,
    };

    // 优先取正面封面，退而取第一张图
    let pictures = tag.pictures();
    let picture = pictures
        .iter()
        .find(|p| matches!(p.pic_type(), PictureType::CoverFront))
        .or_else(|| pictures.first());
    if let Some(picture) = picture {
        let mime = picture
            .mime_type()
            .map(|m| m.as_str().to_string())
            .unwrap_or_else(|| "image/jpeg".to_string());
        metadata.cover_art = Some(CoverArt {
            data: picture.data().to_vec(),
            mime,
        });
    }

    Ok(metadata)
}

fn apply_to_tag(tag: &mut Tag, metadata: &Metadata) {
    if let Some(title) = &metadata.title {
        tag.set_title(title.clone());
    }
    if let Some(artist) = &metadata.artist {
        tag.set_artist(artist.clone());
    }
    if let Some(album) = &metadata.album {
        tag.set_album(album.clone());
    }
    if let Some(album_artist) = &metadata.album_artist {
        tag.insert_text(ItemKey::AlbumArtist, album_artist.clone());
    }
    if let Some(track) = metadata.track_number {
        tag.set_track(track);
    }
    if let Some(disc) = metadata.disc_number {
        tag.set_disk(disc);
    }
    if let Some(year) = metadata.year {
        tag.set_year(year);
    }
    if let Some(genre) = &metadata.genre {
        tag.set_genre(genre.clone());
    }
    if let Some(comment) = &metadata.comment {
        tag.set_comment(comment.clone());
    }
    if let Some(art) = &metadata.cover_art {
        tag.remove_picture_type(PictureType::CoverFront);
        tag.push_picture(Picture::new_unchecked(
            PictureType::CoverFront,
            Some(mime_from_str(&art.mime)),
            None,
            art.data.clone(),
        ));
    }
}

/// 把 ffprobe 的容器标签（key 已小写）映射为归一化记录。
/// ffmpeg 的 ASF 解复用器已把 WM/* 属性折算成标准 key。
fn metadata_from_format_tags(tags: &HashMap<String, String>) -> Metadata {
    let text = |key: &str| -> Option<String> {
        tags.get(key)
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
    };

    Metadata {
        title: text("title"),
        artist: text("artist"),
        album: text("album"),
        album_artist: text("album_artist"),
        track_number: tags.get("track").and_then(|s| parse_leading_u32(s)),
        disc_number: tags.get("disc").and_then(|s| parse_leading_u32(s)),
        year: tags
            .get("date")
            .or_else(|| tags.get("year"))
            .and_then(|s| parse_leading_u32(s)),
        genre: text("genre"),
        comment: text("comment"),
        // ffprobe 标签通道拿不到封面数据
        cover_art: None,
    }
}

fn non_empty(value: Option<Cow<'_, str>>) -> Option<String> {
    value
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// 解析 "3"、"3/12"、"2008-01-01" 这类值的前导数字。
fn parse_leading_u32(text: &str) -> Option<u32> {
    let digits: String = text.trim().chars().take_while(|c| c.is_ascii_digit()).collect();
    if digits.is_empty() {
        None
    } else {
        digits.parse().ok()
    }
}

fn mime_from_str(mime: &str) -> MimeType {
    match mime.to_ascii_lowercase().as_str() {
        "image/jpeg" | "image/jpg" => MimeType::Jpeg,
        "image/png" => MimeType::Png,
        other => MimeType::Unknown(other.to_string()),
    }
}
