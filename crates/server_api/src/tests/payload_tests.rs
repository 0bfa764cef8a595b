use shared::domain::{GpioPinMap, TagSet};

use super::*;

fn submission() -> DeviceSubmission {
    let mut gpio_pins = GpioPinMap::default();
    gpio_pins.insert("GPIO4", "Relay");
    gpio_pins.insert("GPIO2", "LED");
    DeviceSubmission {
        slug: "esp32-devkit".into(),
        board_name: "ESP32 DevKit".into(),
        description: "A dev board".into(),
        chip_type: "ESP32".into(),
        product_link: None,
        gpio_pins,
        tags: TagSet::parse_comma_separated("esp32, relay"),
        yaml_config: "foo: bar".into(),
        images: Vec::new(),
    }
}

#[test]
fn descriptor_has_fixed_layout() {
    assert_eq!(
        render_device_descriptor(&submission()),
        "chip: esp32\n\
         board: esp32-devkit\n\
         name: ESP32 DevKit\n\
         \n\
         # Board Description\n\
         description: A dev board\n\
         \n\
         # Tags\n\
         tags: esp32, relay\n\
         \n\
         # GPIO Pin Configuration\n\
         GPIO4: Relay\n\
         GPIO2: LED\n"
    );
}

#[test]
fn descriptor_is_deterministic() {
    let submission = submission();
    assert_eq!(
        render_device_descriptor(&submission),
        render_device_descriptor(&submission)
    );
}

#[test]
fn body_lists_pins_in_submission_order() {
    let body = render_pull_request_body(&submission(), &[]);
    let relay = body.find("- GPIO4: Relay").expect("relay bullet");
    let led = body.find("- GPIO2: LED").expect("led bullet");
    assert!(relay < led);
    assert!(body.starts_with("# New Device Submission\n"));
    assert!(body.contains("- Name: ESP32 DevKit\n- Chip: ESP32\n- Tags: esp32, relay\n"));
    assert!(body.contains("## Description\nA dev board\n"));
}

#[test]
fn product_section_only_when_link_present() {
    let body = render_pull_request_body(&submission(), &[]);
    assert!(!body.contains("## Product Information"));

    let with_link = DeviceSubmission {
        product_link: Some("https://example.com/board".into()),
        ..submission()
    };
    let body = render_pull_request_body(&with_link, &[]);
    assert!(body.contains("## Product Information\nhttps://example.com/board\n"));
}

#[test]
fn gallery_follows_commit_order() {
    let paths = vec![
        "esp32-devkit/images/top.jpg".to_string(),
        "esp32-devkit/images/bottom.png".to_string(),
    ];
    let body = render_pull_request_body(&submission(), &paths);
    assert!(body.ends_with(
        "## Images\n\
         ![top.jpg](esp32-devkit/images/top.jpg)\n\
         ![bottom.png](esp32-devkit/images/bottom.png)\n"
    ));
}

#[test]
fn title_names_the_board() {
    assert_eq!(pull_request_title(&submission()), "Add device: ESP32 DevKit");
}
