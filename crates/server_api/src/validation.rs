use shared::domain::{DeviceSubmission, GpioPinMap, ImageUpload, SubmissionForm, TagSet};
use thiserror::Error;
use url::Url;

use crate::naming::canonical_slug;

pub const MAX_IMAGE_BYTES: usize = 5 * 1024 * 1024;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Missing required fields: {}", .0.join(", "))]
    MissingFields(Vec<&'static str>),
    #[error("slug {0:?} may only contain lowercase letters, digits, '-' or '.' and must not contain '..'")]
    InvalidSlug(String),
    #[error("gpioPins must be a JSON object mapping pins to functions: {0}")]
    MalformedGpioPins(String),
    #[error("productLink must be an absolute http(s) URL")]
    InvalidProductLink,
    #[error("image {filename} exceeds {limit} bytes")]
    ImageTooLarge { filename: String, limit: usize },
    #[error("file {filename} is not an image ({content_type})")]
    NotAnImage {
        filename: String,
        content_type: String,
    },
}

fn present(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

pub fn parse_gpio_pins(text: &str) -> Result<GpioPinMap, ValidationError> {
    serde_json::from_str(text).map_err(|e| ValidationError::MalformedGpioPins(e.to_string()))
}

fn parse_product_link(raw: Option<String>) -> Result<Option<String>, ValidationError> {
    let Some(link) = present(raw) else {
        return Ok(None);
    };
    match Url::parse(&link) {
        Ok(url) if matches!(url.scheme(), "http" | "https") => Ok(Some(link)),
        _ => Err(ValidationError::InvalidProductLink),
    }
}

fn check_image(image: &ImageUpload) -> Result<(), ValidationError> {
    if image.bytes.len() > MAX_IMAGE_BYTES {
        return Err(ValidationError::ImageTooLarge {
            filename: image.filename.clone(),
            limit: MAX_IMAGE_BYTES,
        });
    }
    if let Some(content_type) = &image.content_type {
        if !content_type.starts_with("image/") {
            return Err(ValidationError::NotAnImage {
                filename: image.filename.clone(),
                content_type: content_type.clone(),
            });
        }
    }
    Ok(())
}

/// Checks a raw form and turns it into a [`DeviceSubmission`]. Pure; makes no
/// remote calls.
pub fn validate(form: SubmissionForm) -> Result<DeviceSubmission, ValidationError> {
    let gpio_pins = match present(form.gpio_pins) {
        Some(text) => Some(parse_gpio_pins(&text)?).filter(|pins| !pins.is_empty()),
        None => None,
    };
    let tags = form
        .tags
        .as_deref()
        .map(TagSet::parse_comma_separated)
        .filter(|tags| !tags.is_empty());
    // Committed verbatim, so only blankness is checked.
    let yaml_config = form.yaml_config.filter(|text| !text.trim().is_empty());

    let fields = (
        present(form.slug),
        present(form.board_name),
        present(form.description),
        present(form.chip_type),
        gpio_pins,
        tags,
        yaml_config,
    );
    let (slug, board_name, description, chip_type, gpio_pins, tags, yaml_config) = match fields {
        (Some(a), Some(b), Some(c), Some(d), Some(e), Some(f), Some(g)) => (a, b, c, d, e, f, g),
        (slug, board_name, description, chip_type, gpio_pins, tags, yaml_config) => {
            let mut missing = Vec::new();
            for (name, is_present) in [
                ("slug", slug.is_some()),
                ("boardName", board_name.is_some()),
                ("description", description.is_some()),
                ("chipType", chip_type.is_some()),
                ("gpioPins", gpio_pins.is_some()),
                ("tags", tags.is_some()),
                ("yamlConfig", yaml_config.is_some()),
            ] {
                if !is_present {
                    missing.push(name);
                }
            }
            return Err(ValidationError::MissingFields(missing));
        }
    };

    let slug = match canonical_slug(&slug) {
        Some(clean) => clean.to_string(),
        None => return Err(ValidationError::InvalidSlug(slug)),
    };
    let product_link = parse_product_link(form.product_link)?;
    for image in &form.images {
        check_image(image)?;
    }

    Ok(DeviceSubmission {
        slug,
        board_name,
        description,
        chip_type,
        product_link,
        gpio_pins,
        tags,
        yaml_config,
        images: form.images,
    })
}

#[cfg(test)]
#[path = "tests/validation_tests.rs"]
mod tests;
