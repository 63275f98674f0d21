use std::{io::Cursor, time::Duration};

use panolayer::{ImageStore, assets::store::ImageSlot};

fn temp_dir(name: &str) -> std::path::PathBuf {
    std::env::temp_dir().join(format!(
        "panolayer_{name}_{}_{}",
        std::process::id(),
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_nanos()
    ))
}

fn png(rgba: [u8; 4]) -> Vec<u8> {
    let img = image::RgbaImage::from_raw(2, 1, [rgba, rgba].concat()).unwrap();
    let mut buf = Vec::new();
    image::DynamicImage::ImageRgba8(img)
        .write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)
        .unwrap();
    buf
}

#[test]
fn request_path_decodes_in_background() {
    let tmp = temp_dir("asset_store_path");
    std::fs::create_dir_all(&tmp).unwrap();
    std::fs::write(tmp.join("img.png"), png([1, 2, 3, 255])).unwrap();

    let mut store = ImageStore::new();
    store.request_path("img.png", tmp.join("img.png"));
    assert!(store.is_pending("img.png"));

    let changed = store.wait_idle(Duration::from_secs(10)).unwrap();
    assert_eq!(changed, vec!["img.png".to_owned()]);
    let img = store.get("img.png").unwrap();
    assert_eq!((img.width(), img.height()), (2, 1));
    assert_eq!(&img.data()[..4], &[1, 2, 3, 255]);

    std::fs::remove_dir_all(&tmp).ok();
}

#[test]
fn decode_is_premultiplied() {
    let mut store = ImageStore::new();
    store.request_bytes("half", png([200, 100, 50, 128]));
    store.wait_idle(Duration::from_secs(10)).unwrap();

    let img = store.get("half").unwrap();
    let px = &img.data()[..4];
    assert_eq!(px[3], 128);
    assert!(px[0].abs_diff(100) <= 1, "{px:?}");
    assert!(px[1].abs_diff(50) <= 1, "{px:?}");
}

#[test]
fn missing_file_and_garbage_bytes_fail_per_key() {
    let mut store = ImageStore::new();
    store.request_path("gone", temp_dir("asset_store_gone").join("nope.png"));
    store.request_bytes("junk", b"definitely not an image".to_vec());
    store.request_bytes("ok", png([0, 0, 0, 255]));
    store.wait_idle(Duration::from_secs(10)).unwrap();

    assert!(matches!(store.state("gone"), Some(ImageSlot::Failed(_))));
    assert!(matches!(store.state("junk"), Some(ImageSlot::Failed(_))));
    assert!(matches!(store.state("ok"), Some(ImageSlot::Ready(_))));
    assert_eq!(store.pending_count(), 0);
}

#[test]
fn removed_key_ignores_late_decode() {
    let mut store = ImageStore::new();
    store.request_bytes("img", png([9, 9, 9, 255]));
    assert!(store.remove("img"));
    store.wait_idle(Duration::from_secs(10)).unwrap();

    // The worker may finish after the removal; its result must not resurrect the key.
    std::thread::sleep(Duration::from_millis(50));
    assert!(store.poll().is_empty());
    assert!(store.state("img").is_none());
    assert!(store.is_empty());
}
