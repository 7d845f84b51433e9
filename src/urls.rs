//! Turning a [`ResolvedVariant`] into the URL of a derived image.
//!
//! The built-in [`StyleTemplate`] targets image-style paths of the form
//!
//! ```text
//! {base_path}{file_path}/styles/{style}_{bucket}_{type}_{size}/public/{rest}
//! ```
//!
//! where `{rest}` is whatever followed the `public://` scheme in the slot's
//! source reference. Hosts with a different URL scheme plug in their own
//! [`UrlBuilder`]; any `Fn(&str, &ResolvedVariant) -> String` qualifies.

use crate::config::UrlConfig;
use crate::resolver::ResolvedVariant;
use std::fmt;

/// Builds the request URL for a slot's source and resolved variant.
pub trait UrlBuilder {
    fn build(&self, source: &str, variant: &ResolvedVariant) -> String;
}

impl<F> UrlBuilder for F
where
    F: Fn(&str, &ResolvedVariant) -> String,
{
    fn build(&self, source: &str, variant: &ResolvedVariant) -> String {
        self(source, variant)
    }
}

type AlterFn = Box<dyn Fn(String) -> String>;

/// Substitutes style, bucket, type tag and size into a styles path.
pub struct StyleTemplate {
    base_path: String,
    file_path: String,
    style: String,
    type_tag: String,
    scheme: String,
    alter: Option<AlterFn>,
}

impl StyleTemplate {
    pub fn from_config(config: &UrlConfig) -> Self {
        Self {
            base_path: config.base_path.clone(),
            file_path: config.file_path.clone(),
            style: config.style.clone(),
            type_tag: config.type_tag.clone(),
            scheme: config.scheme.clone(),
            alter: None,
        }
    }

    /// Post-process every built URL (cache busting, CDN host rewrite, ...).
    pub fn with_alter(mut self, alter: impl Fn(String) -> String + 'static) -> Self {
        self.alter = Some(Box::new(alter));
        self
    }

    /// The styles directory for one variant, with a trailing `/`.
    pub fn style_path(&self, variant: &ResolvedVariant) -> String {
        format!(
            "{}{}/styles/{}_{}_{}_{}/public/",
            self.base_path, self.file_path, self.style, variant.bucket, self.type_tag, variant.size
        )
    }
}

impl UrlBuilder for StyleTemplate {
    fn build(&self, source: &str, variant: &ResolvedVariant) -> String {
        let url = source.replacen(&self.scheme, &self.style_path(variant), 1);
        match &self.alter {
            Some(alter) => alter(url),
            None => url,
        }
    }
}

impl fmt::Debug for StyleTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StyleTemplate")
            .field("base_path", &self.base_path)
            .field("file_path", &self.file_path)
            .field("style", &self.style)
            .field("type_tag", &self.type_tag)
            .field("scheme", &self.scheme)
            .field("alter", &self.alter.is_some())
            .finish()
    }
}
