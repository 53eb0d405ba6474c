use super::*;

#[test]
fn intersect_of_disjoint_viewports_is_empty() {
    let a = Viewport::new(0, 0, 10, 10);
    let b = Viewport::new(10, 0, 5, 5);
    assert!(a.intersect(b).is_empty());
    assert_eq!(a.intersect(b).num_pixels(), 0);
}

#[test]
fn intersect_and_union_cover_expected_rects() {
    let a = Viewport::new(0, 0, 10, 10);
    let b = Viewport::new(5, 4, 10, 10);
    assert_eq!(a.intersect(b), Viewport::new(5, 4, 5, 6));
    assert_eq!(a.union(b), Viewport::new(0, 0, 15, 14));
    assert_eq!(Viewport::empty().union(b), b);
    assert!(a.union(b).contains(a));
    assert!(!a.contains(b));
}

#[test]
fn rgba8_encoding_truncates() {
    assert_eq!(Rgba::new(0.5, 0.25, 1.0, 0.0).to_rgba8(), [127, 63, 255, 0]);
    assert!(Rgba::TRANSPARENT.is_zero_word());
    assert!(Rgba::new(0.001, 0.0, 0.0, 0.0).is_zero_word());
    assert!(!Rgba::new(0.5, 0.5, 0.5, 1.0).is_zero_word());
}

#[test]
fn checked_conversions_report_errors() {
    assert!(to_usize(-1, "width").is_err());
    assert_eq!(to_usize(7, "width").unwrap(), 7);
    assert_eq!(to_u32(9, "len").unwrap(), 9);
}
