use std::fmt::Write as _;

use shared::domain::DeviceSubmission;

pub fn pull_request_title(submission: &DeviceSubmission) -> String {
    format!("Add device: {}", submission.board_name)
}

/// Renders `{slug}/device.yaml`. Pins appear in submission order.
pub fn render_device_descriptor(submission: &DeviceSubmission) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "chip: {}", submission.chip_type.to_lowercase());
    let _ = writeln!(out, "board: {}", submission.slug);
    let _ = writeln!(out, "name: {}", submission.board_name);
    out.push('\n');
    out.push_str("# Board Description\n");
    let _ = writeln!(out, "description: {}", submission.description);
    out.push('\n');
    out.push_str("# Tags\n");
    let _ = writeln!(out, "tags: {}", submission.tags.joined());
    out.push('\n');
    out.push_str("# GPIO Pin Configuration\n");
    for pin in submission.gpio_pins.iter() {
        let _ = writeln!(out, "{}: {}", pin.pin, pin.function);
    }
    out
}

/// Renders the markdown pull request body. `image_paths` are listed in the
/// order given, which is the order they were committed.
pub fn render_pull_request_body(submission: &DeviceSubmission, image_paths: &[String]) -> String {
    let mut out = String::from("# New Device Submission\n\n## Device Information\n");
    let _ = writeln!(out, "- Name: {}", submission.board_name);
    let _ = writeln!(out, "- Chip: {}", submission.chip_type);
    let _ = writeln!(out, "- Tags: {}", submission.tags.joined());

    out.push_str("\n## Description\n");
    let _ = writeln!(out, "{}", submission.description);

    if let Some(link) = submission.product_link.as_deref().filter(|l| !l.is_empty()) {
        out.push_str("\n## Product Information\n");
        let _ = writeln!(out, "{link}");
    }

    out.push_str("\n## GPIO Configuration\n");
    for pin in submission.gpio_pins.iter() {
        let _ = writeln!(out, "- {}: {}", pin.pin, pin.function);
    }

    out.push_str("\n## Images\n");
    for path in image_paths {
        let name = path.rsplit('/').next().unwrap_or(path);
        let _ = writeln!(out, "![{name}]({path})");
    }
    out
}

#[cfg(test)]
#[path = "tests/payload_tests.rs"]
mod tests;
