//! Model URL layout: `{root_url}/{url_template}/{file...}`.
//!
//! The template places two placeholders between the hub root and the file
//! path. `{model}` spans two segments (`owner/name`), `{revision}` spans one,
//! and any other segment is a literal that must match exactly:
//!
//! ```text
//! {model}/{revision}           → org/m/v1/onnx/w.bin
//! {model}/resolve/{revision}   → org/m/resolve/v1/onnx/w.bin
//! ```
//!
//! Rendering goes through [upon], configured with single-brace expression
//! delimiters so the template reads the same way it is configured.

use crate::error::{Error, ErrorKind, Result};
use exn::ResultExt;
use modelhub_cache::Owner;
use modelhub_config::HubSettings;
use std::str::FromStr;
use upon::{Engine, Syntax, Template};
use url::Url;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Model,
    Revision,
    Literal(String),
}

/// A compiled URL template.
pub struct UrlTemplate {
    source: String,
    segments: Vec<Segment>,
    engine: Engine<'static>,
    template: Template<'static>,
}
impl FromStr for UrlTemplate {
    type Err = Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let invalid = || ErrorKind::InvalidTemplate(s.to_string());
        let mut segments = Vec::new();
        for part in s.trim_matches('/').split('/') {
            let segment = match part.strip_prefix('{').and_then(|p| p.strip_suffix('}')) {
                Some(name) => match name.trim() {
                    "model" => Segment::Model,
                    "revision" => Segment::Revision,
                    _ => exn::bail!(invalid()),
                },
                None if part.is_empty() || part.contains(['{', '}']) => exn::bail!(invalid()),
                None => Segment::Literal(part.to_string()),
            };
            segments.push(segment);
        }
        let count = |wanted: &Segment| segments.iter().filter(|s| *s == wanted).count();
        if count(&Segment::Model) != 1 || count(&Segment::Revision) != 1 {
            exn::bail!(invalid());
        }
        let engine = Engine::with_syntax(Syntax::builder().expr("{", "}").build());
        // Compile up front so a broken template fails at construction.
        let template = engine.compile(s.trim_matches('/').to_string()).or_raise(invalid)?;
        Ok(Self {
            source: s.to_string(),
            segments,
            engine,
            template,
        })
    }
}
impl UrlTemplate {
    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Fill in the placeholders.
    pub fn render(&self, model: &str, revision: &str) -> Result<String> {
        self.template
            .render(&self.engine, upon::value! { model: model, revision: revision })
            .to_string()
            .or_raise(|| ErrorKind::InvalidTemplate(self.source.clone()))
    }

    /// Match leading path segments against the template, returning the model,
    /// revision and how many segments were consumed.
    fn match_segments(&self, parts: &[&str]) -> Option<(String, String, usize)> {
        let mut parts = parts.iter().copied();
        let mut next = || parts.next().filter(|p| !p.is_empty());
        let (mut model, mut revision, mut consumed) = (None, None, 0);
        for segment in &self.segments {
            match segment {
                Segment::Model => {
                    let (owner, name) = (next()?, next()?);
                    model = Some(format!("{owner}/{name}"));
                    consumed += 2;
                },
                Segment::Revision => {
                    revision = Some(next()?.to_string());
                    consumed += 1;
                },
                Segment::Literal(literal) => {
                    if next()? != literal.as_str() {
                        return None;
                    }
                    consumed += 1;
                },
            }
        }
        Some((model?, revision?, consumed))
    }
}

/// A model file URL taken apart.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelUrl {
    /// `owner/name`.
    pub model: String,
    pub revision: String,
    pub file: String,
    /// `{hostname}/{owner}/{name}`; keeps same-named models from different
    /// hubs apart.
    pub model_with_hostname: String,
}

/// Where the hub lives and how its URLs are laid out.
pub struct UrlOptions {
    root: Url,
    template: UrlTemplate,
}
impl UrlOptions {
    pub fn new(root_url: &str, url_template: &str) -> Result<Self> {
        let mut root = Url::parse(root_url).or_raise(|| ErrorKind::InvalidUrlFormat(root_url.to_string()))?;
        if root.cannot_be_a_base() {
            exn::bail!(ErrorKind::InvalidUrlFormat(root_url.to_string()));
        }
        // Without the trailing slash, joining would replace the last segment.
        if !root.path().ends_with('/') {
            let path = format!("{}/", root.path());
            root.set_path(&path);
        }
        root.set_query(None);
        root.set_fragment(None);
        Ok(Self {
            root,
            template: url_template.parse()?,
        })
    }

    pub fn from_settings(settings: &HubSettings) -> Result<Self> {
        Self::new(&settings.root_url, &settings.url_template)
    }

    pub fn root(&self) -> &Url {
        &self.root
    }

    /// Hub name models from this root are namespaced under. Hosts without a
    /// name (bundled `file:` roots) count as the local hub.
    pub fn hostname(&self) -> &str {
        self.root.host_str().unwrap_or(Owner::LOCAL_HUB)
    }

    /// Remote URL of a file.
    pub fn file_url(&self, model: &str, revision: &str, file: &str) -> Result<Url> {
        let relative = format!("{}/{file}", self.template.render(model, revision)?);
        self.root.join(&relative).or_raise(|| ErrorKind::InvalidModelUrl(relative))
    }

    /// Take apart a root-relative (`/org/m/v1/w.bin`) or absolute URL.
    pub fn parse(&self, url: &str) -> Result<ModelUrl> {
        let root = self.root.as_str();
        let rest = match url.strip_prefix(root) {
            Some(rest) => rest,
            None if url.starts_with('/') => url.trim_start_matches('/'),
            None => exn::bail!(ErrorKind::InvalidUrlFormat(url.to_string())),
        };
        let rest = rest.split(['?', '#']).next().unwrap_or_default();
        let parts: Vec<&str> = rest.split('/').collect();
        let invalid = || ErrorKind::InvalidModelUrl(url.to_string());
        let Some((model, revision, consumed)) = self.template.match_segments(&parts) else {
            exn::bail!(invalid());
        };
        let file = parts[consumed..].join("/");
        if file.is_empty() || file.ends_with('/') {
            exn::bail!(invalid());
        }
        Ok(ModelUrl {
            model_with_hostname: format!("{}/{model}", self.hostname()),
            model,
            revision,
            file,
        })
    }
}

/// Take apart a model file URL.
pub fn parse_url(url: &str, options: &UrlOptions) -> Result<ModelUrl> {
    options.parse(url)
}
