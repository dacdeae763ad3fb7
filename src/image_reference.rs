use regex::Regex;
use std::fmt;
use std::sync::LazyLock;

pub static DEFAULT_DOMAIN: &str = "docker.io";
static LEGACY_DEFAULT_DOMAIN: &str = "index.docker.io";
static OFFICIAL_REPOSITORY_PREFIX: &str = "library/";
static DIGEST_DELIMITER: &str = "@sha";
const MAX_NAME_LENGTH: usize = 255;

static DOMAIN_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^(?:[a-zA-Z0-9](?:[a-zA-Z0-9-]*[a-zA-Z0-9])?(?:\.[a-zA-Z0-9](?:[a-zA-Z0-9-]*[a-zA-Z0-9])?)*|\[[0-9a-fA-F:]+\])(?::[0-9]+)?$",
    )
    .expect("domain regex is valid")
});
static PATH_COMPONENT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-z0-9]+(?:(?:[._]|__|-+)[a-z0-9]+)*$").expect("path component regex is valid")
});
static TAG_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_][A-Za-z0-9_.-]{0,127}$").expect("tag regex is valid"));
static DIGEST_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z][A-Za-z0-9]*(?:[-_+.][A-Za-z][A-Za-z0-9]*)*:[0-9a-fA-F]{32,}$")
        .expect("digest regex is valid")
});

/// A normalized container image reference: `domain/path[:tag][@digest]`.
///
/// Parsing follows the Docker distribution rules, so `nginx` becomes
/// `docker.io/library/nginx` and `index.docker.io` is folded into `docker.io`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageReference {
    pub domain: String,
    pub path: String,
    pub tag: Option<String>,
    pub digest: Option<String>,
}

#[derive(Debug, PartialEq, Eq)]
pub enum ParseError {
    Empty,
    NameTooLong(usize),
    InvalidDomain(String),
    InvalidRepository(String),
    InvalidTag(String),
    InvalidDigest(String),
}

impl std::error::Error for ParseError {}
impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParseError::Empty => write!(f, "image reference is empty"),
            ParseError::NameTooLong(length) => write!(
                f,
                "repository name must not be longer than {} characters, got {}",
                MAX_NAME_LENGTH, length
            ),
            ParseError::InvalidDomain(domain) => write!(f, "invalid registry domain: {}", domain),
            ParseError::InvalidRepository(path) => write!(f, "invalid repository name: {}", path),
            ParseError::InvalidTag(tag) => write!(f, "invalid tag: {}", tag),
            ParseError::InvalidDigest(digest) => write!(f, "invalid digest: {}", digest),
        }
    }
}

impl ImageReference {
    pub fn parse(s: &str) -> Result<Self, ParseError> {
        if s.is_empty() {
            return Err(ParseError::Empty);
        }

        let (name_and_tag, digest) = match s.split_once('@') {
            Some((name, digest)) => {
                if !DIGEST_RE.is_match(digest) {
                    return Err(ParseError::InvalidDigest(digest.to_string()));
                }
                (name, Some(digest.to_string()))
            }
            None => (s, None),
        };

        // a colon only starts the tag when it comes after the last slash, otherwise it is a port
        let (name, tag) = match name_and_tag.rfind(':') {
            Some(pos) if pos > name_and_tag.rfind('/').unwrap_or(0) => {
                let tag = &name_and_tag[pos + 1..];
                if !TAG_RE.is_match(tag) {
                    return Err(ParseError::InvalidTag(tag.to_string()));
                }
                (&name_and_tag[..pos], Some(tag.to_string()))
            }
            _ => (name_and_tag, None),
        };

        let (domain, path) = split_domain(name);

        if !DOMAIN_RE.is_match(&domain) {
            return Err(ParseError::InvalidDomain(domain));
        }
        if path.is_empty() || !path.split('/').all(|c| PATH_COMPONENT_RE.is_match(c)) {
            return Err(ParseError::InvalidRepository(path));
        }

        let reference = Self {
            domain,
            path,
            tag,
            digest,
        };
        let length = reference.name().len();
        if length > MAX_NAME_LENGTH {
            return Err(ParseError::NameTooLong(length));
        }

        Ok(reference)
    }

    /// Fully qualified repository name without tag or digest.
    pub fn name(&self) -> String {
        format!("{}/{}", self.domain, self.path)
    }

    /// Repository name the way `docker` prints it, without the default registry
    /// and without the `library/` prefix of official images.
    pub fn familiar_name(&self) -> String {
        if self.domain != DEFAULT_DOMAIN {
            return self.name();
        }
        match self.path.strip_prefix(OFFICIAL_REPOSITORY_PREFIX) {
            Some(official) if !official.contains('/') => official.to_string(),
            _ => self.path.clone(),
        }
    }

    pub fn familiar_string(&self) -> String {
        let mut familiar = self.familiar_name();
        if let Some(tag) = &self.tag {
            familiar.push(':');
            familiar.push_str(tag);
        }
        if let Some(digest) = &self.digest {
            familiar.push('@');
            familiar.push_str(digest);
        }
        familiar
    }

    pub fn is_digest_qualified(&self) -> bool {
        self.digest.is_some()
    }

    /// Binds this reference to `digest`, keeping the tag for display.
    pub fn with_digest(&self, digest: &str) -> Result<Self, ParseError> {
        if !DIGEST_RE.is_match(digest) {
            return Err(ParseError::InvalidDigest(digest.to_string()));
        }
        Ok(Self {
            digest: Some(digest.to_string()),
            ..self.clone()
        })
    }
}

/// Removes a `@sha...` digest suffix so that resolution targets the tag again.
pub fn strip_digest(image: &str) -> &str {
    image
        .split_once(DIGEST_DELIMITER)
        .map_or(image, |(name, _)| name)
}

/// Normalizes a registry hostname so `index.docker.io` and `docker.io` compare equal.
pub fn normalize_domain(domain: &str) -> &str {
    if domain == LEGACY_DEFAULT_DOMAIN {
        DEFAULT_DOMAIN
    } else {
        domain
    }
}

fn split_domain(name: &str) -> (String, String) {
    let (domain, remainder) = match name.split_once('/') {
        Some((first, rest))
            if first.contains(['.', ':'])
                || first == "localhost"
                || first.to_lowercase() != first =>
        {
            (normalize_domain(first).to_string(), rest.to_string())
        }
        _ => (DEFAULT_DOMAIN.to_string(), name.to_string()),
    };

    if domain == DEFAULT_DOMAIN && !remainder.contains('/') {
        return (domain, format!("{}{}", OFFICIAL_REPOSITORY_PREFIX, remainder));
    }
    (domain, remainder)
}
