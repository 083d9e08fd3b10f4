//! Output filename templates
//!
//! `[name].[contenthash:8].css` → `main.5d41402a.css`
//!
//! Tokens are case-insensitive:
//! - `[name]`: chunk name
//! - `[id]`: chunk id
//! - `[hash]`: build hash
//! - `[contenthash]`, `[contenthash:<len>]`, `[contenthash:<algorithm>]`,
//!   `[contenthash:<algorithm>:<len>]`: digest of the file content
//!
//! Algorithms are `md5` (default), `sha256` and `sha512`, hex-encoded, and
//! `rapidhash`, encoded in the dodeca alphabet: base12 with characters from
//! "dodeca" (a, c, d, e, o) plus digits 0-6, `0123456acdeo`.

use std::hash::Hasher;
use std::sync::LazyLock;

use rapidhash::fast::RapidHasher;
use regex::{Captures, Regex};
use sha2::{Digest, Sha256, Sha512};

use crate::build::Chunk;

/// The dodeca alphabet: 7 digits (0-6) + 5 unique letters from "dodeca"
const DODECA_ALPHABET: &[u8; 12] = b"0123456acdeo";

/// Number of characters in dodeca hashes (12 for "dodeca" = 12-sided)
const DODECA_HASH_LEN: usize = 12;

static TOKEN_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\[([^\[\]]+)\]").unwrap());

/// Encode a u64 hash as a 12-character dodeca string (base12)
pub fn encode_dodeca(mut hash: u64) -> String {
    let mut result = [b'0'; DODECA_HASH_LEN];

    for slot in result.iter_mut().rev() {
        *slot = DODECA_ALPHABET[(hash % 12) as usize];
        hash /= 12;
    }

    result.iter().map(|&b| b as char).collect()
}

/// Content digest algorithms usable in `[contenthash:...]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HashAlgorithm {
    Md5,
    Sha256,
    Sha512,
    Rapidhash,
}

impl HashAlgorithm {
    fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "md5" => Some(Self::Md5),
            "sha256" => Some(Self::Sha256),
            "sha512" => Some(Self::Sha512),
            "rapidhash" => Some(Self::Rapidhash),
            _ => None,
        }
    }

    pub fn digest(self, content: &[u8]) -> String {
        match self {
            Self::Md5 => format!("{:x}", md5::compute(content)),
            Self::Sha256 => hex::encode(Sha256::digest(content)),
            Self::Sha512 => hex::encode(Sha512::digest(content)),
            Self::Rapidhash => {
                let mut hasher = RapidHasher::default();
                hasher.write(content);
                encode_dodeca(hasher.finish())
            }
        }
    }
}

/// `[contenthash...]` parameters, or `None` if `token` is some other token.
fn parse_contenthash(token: &str) -> Option<(HashAlgorithm, Option<usize>)> {
    let mut parts = token.split(':');
    if !parts.next()?.eq_ignore_ascii_case("contenthash") {
        return None;
    }

    let mut algorithm = HashAlgorithm::Md5;
    let mut length = None;
    match (parts.next(), parts.next(), parts.next()) {
        (None, _, _) => {}
        (Some(param), None, _) => match param.parse::<usize>() {
            Ok(len) => length = Some(len),
            Err(_) => algorithm = HashAlgorithm::from_name(param)?,
        },
        (Some(algo), Some(len), None) => {
            algorithm = HashAlgorithm::from_name(algo)?;
            length = Some(len.parse().ok()?);
        }
        _ => return None,
    }
    Some((algorithm, length))
}

/// Values the template is filled in from.
#[derive(Debug, Clone, Copy)]
pub struct TemplateContext<'a> {
    pub chunk: &'a Chunk,
    pub build_hash: &'a str,
    pub content: &'a [u8],
}

/// Fill in `template`. Returns the offending token if one isn't known.
pub fn render_filename(template: &str, ctx: &TemplateContext<'_>) -> Result<String, String> {
    let mut unresolved = None;
    let rendered = TOKEN_RE.replace_all(template, |caps: &Captures<'_>| {
        let token = &caps[1];
        let value = match token.to_ascii_lowercase().as_str() {
            "name" => Some(ctx.chunk.display_name()),
            "id" => Some(ctx.chunk.id.to_string()),
            "hash" => Some(ctx.build_hash.to_string()),
            _ => parse_contenthash(token).map(|(algorithm, length)| {
                let mut digest = algorithm.digest(ctx.content);
                if let Some(len) = length {
                    digest.truncate(len);
                }
                digest
            }),
        };
        value.unwrap_or_else(|| {
            unresolved.get_or_insert_with(|| token.to_string());
            caps[0].to_string()
        })
    });

    match unresolved {
        Some(token) => Err(token),
        None => Ok(rendered.into_owned()),
    }
}
