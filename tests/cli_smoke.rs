use std::path::{Path, PathBuf};

fn temp_dir(name: &str) -> PathBuf {
    std::env::temp_dir().join(format!(
        "panolayer_{name}_{}_{}",
        std::process::id(),
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_nanos()
    ))
}

fn write_png(path: &Path, w: u32, h: u32, rgba: [u8; 4]) {
    image::RgbaImage::from_pixel(w, h, image::Rgba(rgba))
        .save_with_format(path, image::ImageFormat::Png)
        .unwrap();
}

fn write_scene(dir: &Path) -> PathBuf {
    write_png(&dir.join("bg.png"), 32, 18, [255, 0, 0, 255]);
    write_png(&dir.join("fg.png"), 8, 8, [0, 0, 255, 255]);
    let scene = serde_json::json!({
        "project": { "width": 64, "height": 36, "fps": 10, "duration": 1 },
        "layers": [
            { "id": "bg", "type": "background", "image": "bg.png" },
            { "id": "fg", "type": "foreground", "image": "fg.png",
              "keyframes": { "x": [{ "time": 0, "value": 0 }, { "time": 1, "value": 16 }] } }
        ]
    });
    let path = dir.join("scene.json");
    std::fs::write(&path, serde_json::to_vec_pretty(&scene).unwrap()).unwrap();
    path
}

fn panolayer() -> std::process::Command {
    std::process::Command::new(env!("CARGO_BIN_EXE_panolayer"))
}

#[test]
fn cli_render_writes_png() {
    let dir = temp_dir("cli_render");
    std::fs::create_dir_all(&dir).unwrap();
    let scene = write_scene(&dir);
    let out = dir.join("out").join("frame.png");

    let status = panolayer()
        .args(["render", "--backend", "cpu", "--time", "1", "--scene"])
        .arg(&scene)
        .arg("--out")
        .arg(&out)
        .status()
        .unwrap();
    assert!(status.success());

    let img = image::open(&out).unwrap().to_rgba8();
    assert_eq!(img.dimensions(), (64, 36));
    assert_eq!(img.get_pixel(48, 18).0, [0, 0, 255, 255]);
    assert_eq!(img.get_pixel(32, 18).0, [255, 0, 0, 255]);

    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn cli_render_with_overlays() {
    let dir = temp_dir("cli_overlays");
    std::fs::create_dir_all(&dir).unwrap();
    let scene = write_scene(&dir);
    let out = dir.join("overlay.png");

    let status = panolayer()
        .args(["render", "--backend", "cpu", "--overlays", "--select", "fg", "--scene"])
        .arg(&scene)
        .arg("--out")
        .arg(&out)
        .status()
        .unwrap();
    assert!(status.success());
    assert!(out.exists());

    let status = panolayer()
        .args(["render", "--backend", "cpu", "--overlays", "--select", "nope", "--scene"])
        .arg(&scene)
        .arg("--out")
        .arg(dir.join("never.png"))
        .status()
        .unwrap();
    assert!(!status.success());

    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn cli_matte_writes_grayscale_png() {
    let dir = temp_dir("cli_matte");
    std::fs::create_dir_all(&dir).unwrap();
    let scene = write_scene(&dir);
    let out = dir.join("matte.png");

    let status = panolayer()
        .args(["matte", "--scene"])
        .arg(&scene)
        .arg("--out")
        .arg(&out)
        .status()
        .unwrap();
    assert!(status.success());

    let img = image::open(&out).unwrap().to_luma8();
    assert_eq!(img.dimensions(), (64, 36));
    assert_eq!(img.get_pixel(32, 18).0, [255]);
    assert_eq!(img.get_pixel(2, 2).0, [0]);

    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn cli_rejects_missing_scene() {
    let dir = temp_dir("cli_missing");
    let status = panolayer()
        .args(["render", "--backend", "cpu", "--scene"])
        .arg(dir.join("absent.json"))
        .arg("--out")
        .arg(dir.join("out.png"))
        .status()
        .unwrap();
    assert!(!status.success());
}
