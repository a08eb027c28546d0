// src/core/dataset.rs

//! Fixture loading: the user roster, avatar pools, message corpus, and the
//! seeded channels. The deterministic seeds keep the in-memory view aligned
//! with the dataset the target application was provisioned from.

use anyhow::{Context, Result, bail};
use bytes::Bytes;
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use sha1::{Digest, Sha1};
use std::fs;
use std::path::Path;
use std::sync::Arc;

/// Seed for the user-to-avatar assignment and the preseeded message corpus.
const ASSIGNMENT_SEED: u64 = 3656;
/// Seed for the avatar-variant expansion.
const VARIANT_SEED: u64 = 3657;

const MAX_AVATAR_BYTES: u64 = 1024 * 1024;

/// The byte pattern rewritten to derive additional avatar variants.
const VARIANT_PATTERN: &[u8] = b"e4nwaAsqAt5od9";

const ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ";

/// One uploadable avatar image with its precomputed digests.
#[derive(Debug, Clone)]
pub struct Avatar {
    pub file_name: String,
    pub sha1: String,
    pub md5: String,
    pub bytes: Bytes,
}

/// A virtual user. Credentials are immutable; the current avatar changes as
/// profile scenarios run.
#[derive(Debug)]
pub struct AppUser {
    pub name: String,
    pub password: String,
    pub display_name: String,
    pub avatar: Mutex<Option<Arc<Avatar>>>,
}

#[derive(Debug, Clone)]
pub struct Channel {
    pub id: i64,
    pub name: String,
    pub description: String,
}

/// A message known to exist in the provisioned dataset.
#[derive(Debug, Clone)]
pub struct SeedMessage {
    pub channel_id: i64,
    pub user_name: String,
    pub content: String,
}

pub struct DataSet {
    pub users: Vec<Arc<AppUser>>,
    pub new_users: Vec<Arc<AppUser>>,
    pub channels: Vec<Arc<Channel>>,
    pub avatars: Vec<Arc<Avatar>>,
    pub large_avatars: Vec<Arc<Avatar>>,
    pub default_avatar: Arc<Avatar>,
    pub texts: Vec<String>,
    pub messages: Vec<SeedMessage>,
}

fn reverse(s: &str) -> String {
    s.chars().rev().collect()
}

fn load_avatar(path: &Path) -> Result<Avatar> {
    let bytes = fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    Ok(Avatar {
        file_name,
        sha1: hex::encode(Sha1::digest(&bytes)),
        md5: format!("{:x}", md5::compute(&bytes)),
        bytes: Bytes::from(bytes),
    })
}

fn is_image_file(name: &str) -> bool {
    [".png", ".jpg", ".jpeg", ".gif"].iter().any(|ext| name.ends_with(ext))
}

/// Lists the image files of a directory in name order, so seeded assignment
/// stays stable across runs.
fn image_paths(dir: &Path) -> Result<Vec<std::path::PathBuf>> {
    let mut paths: Vec<_> = fs::read_dir(dir)
        .with_context(|| format!("failed to list {}", dir.display()))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| {
            p.file_name()
                .map(|n| is_image_file(&n.to_string_lossy()))
                .unwrap_or(false)
        })
        .collect();
    paths.sort();
    Ok(paths)
}

fn replace_bytes(haystack: &[u8], needle: &[u8], replacement: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(haystack.len());
    let mut i = 0;
    while i < haystack.len() {
        if haystack[i..].starts_with(needle) {
            out.extend_from_slice(replacement);
            i += needle.len();
        } else {
            out.push(haystack[i]);
            i += 1;
        }
    }
    out
}

fn gen_salt(n: usize, rng: &mut StdRng) -> Vec<u8> {
    (0..n).map(|_| ALPHABET[rng.gen_range(0..ALPHABET.len())]).collect()
}

impl DataSet {
    pub fn load(data_dir: &Path) -> Result<Self> {
        let (users, new_users) = load_users(data_dir)?;
        let (avatars, large_avatars, default_avatar) = load_avatars(data_dir)?;
        let texts = load_texts(data_dir)?;

        let mut dataset = Self {
            users,
            new_users,
            channels: Vec::new(),
            avatars,
            large_avatars,
            default_avatar,
            texts,
            messages: Vec::new(),
        };

        dataset.seed_messages();
        dataset.assign_user_avatars();
        dataset.seed_channels();
        dataset.expand_avatar_variants();

        Ok(dataset)
    }

    /// Three corpus entries concatenated; the write load posts these.
    pub fn random_text(&self) -> String {
        let mut rng = rand::thread_rng();
        let pick = |rng: &mut rand::rngs::ThreadRng| {
            self.texts[rng.gen_range(0..self.texts.len())].as_str()
        };
        let mut text = String::new();
        text.push_str(pick(&mut rng));
        text.push_str(pick(&mut rng));
        text.push_str(pick(&mut rng));
        text
    }

    fn seed_messages(&mut self) {
        let mut rng = StdRng::seed_from_u64(ASSIGNMENT_SEED);
        let n = self.users.len();
        for i in 0..10000 {
            let channel_id = rng.gen_range(1..=10);
            let user = &self.users[i % n];

            let mut content = String::new();
            for _ in 0..3 {
                content.push_str(&self.texts[rng.gen_range(0..self.texts.len())]);
            }

            self.messages.push(SeedMessage {
                channel_id,
                user_name: user.name.clone(),
                content,
            });
        }
    }

    fn assign_user_avatars(&mut self) {
        let mut rng = StdRng::seed_from_u64(ASSIGNMENT_SEED);
        for user in &self.users {
            let avatar = Arc::clone(&self.avatars[rng.gen_range(0..self.avatars.len())]);
            *user.avatar.lock() = Some(avatar);
        }
    }

    fn seed_channels(&mut self) {
        for i in 1..=10 {
            self.channels.push(Arc::new(Channel {
                id: i,
                name: format!("channel{i}"),
                description: format!("this is channel{i}"),
            }));
        }
    }

    /// Derives one extra variant per avatar by rewriting a fixed byte pattern
    /// with a seeded salt, doubling the pool without more fixture files.
    fn expand_avatar_variants(&mut self) {
        let mut rng = StdRng::seed_from_u64(VARIANT_SEED);
        let original = self.avatars.len();
        for i in 0..original {
            let source = Arc::clone(&self.avatars[i]);
            let salt = gen_salt(VARIANT_PATTERN.len(), &mut rng);
            let bytes = replace_bytes(&source.bytes, VARIANT_PATTERN, &salt);
            self.avatars.push(Arc::new(Avatar {
                file_name: source.file_name.clone(),
                sha1: hex::encode(Sha1::digest(&bytes)),
                md5: format!("{:x}", md5::compute(&bytes)),
                bytes: Bytes::from(bytes),
            }));
        }
    }
}

fn load_users(data_dir: &Path) -> Result<(Vec<Arc<AppUser>>, Vec<Arc<AppUser>>)> {
    let path = data_dir.join("user.tsv");
    let content =
        fs::read_to_string(&path).with_context(|| format!("failed to read {}", path.display()))?;

    let mut users = Vec::new();
    let mut new_users = Vec::new();

    for (i, line) in content.lines().enumerate() {
        let Some((display_name, addr)) = line.split_once('\t') else {
            bail!("malformed line {} in {}", i + 1, path.display());
        };
        let name = addr.split('@').next().unwrap_or(addr).to_string();
        let user = Arc::new(AppUser {
            password: format!("{}{}", name, reverse(&name)),
            display_name: display_name.to_string(),
            name,
            avatar: Mutex::new(None),
        });

        if i < 1000 {
            users.push(user);
        } else {
            new_users.push(user);
        }
    }

    Ok((users, new_users))
}

fn load_avatars(data_dir: &Path) -> Result<(Vec<Arc<Avatar>>, Vec<Arc<Avatar>>, Arc<Avatar>)> {
    let default_avatar = Arc::new(load_avatar(&data_dir.join("default.png"))?);

    let mut avatars = Vec::new();
    for path in image_paths(&data_dir.join("avatar"))? {
        let avatar = load_avatar(&path)?;
        if avatar.bytes.len() as u64 > MAX_AVATAR_BYTES {
            bail!("avatar too large: {}", path.display());
        }
        avatars.push(Arc::new(avatar));
    }

    let mut large_avatars = Vec::new();
    for path in image_paths(&data_dir.join("large-avatar"))? {
        let avatar = load_avatar(&path)?;
        if avatar.bytes.len() as u64 <= MAX_AVATAR_BYTES {
            bail!("large-avatar too small: {}", path.display());
        }
        large_avatars.push(Arc::new(avatar));
    }

    if avatars.is_empty() {
        bail!("no avatars found under {}", data_dir.display());
    }
    if large_avatars.is_empty() {
        bail!("no large-avatars found under {}", data_dir.display());
    }

    Ok((avatars, large_avatars, default_avatar))
}

fn load_texts(data_dir: &Path) -> Result<Vec<String>> {
    let dir = data_dir.join("message");
    let mut texts = Vec::new();

    let mut paths: Vec<_> = fs::read_dir(&dir)
        .with_context(|| format!("failed to list {}", dir.display()))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.extension().is_some_and(|ext| ext == "txt"))
        .collect();
    paths.sort();

    for path in paths {
        let content = fs::read_to_string(&path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        for line in content.lines() {
            // Ideographic spaces round-trip inconsistently through the
            // application's JSON responses, so they are stripped up front.
            let text = line.replace('\u{3000}', "");
            texts.push(text.trim().to_string());
        }
    }

    if texts.is_empty() {
        bail!("no message corpus found under {}", dir.display());
    }

    Ok(texts)
}

/// A random ASCII-letter string, used to probe nonexistent users and
/// credentials.
pub fn random_alphabet_string(n: usize) -> String {
    let mut rng = rand::thread_rng();
    (0..n).map(|_| ALPHABET[rng.gen_range(0..ALPHABET.len())] as char).collect()
}
