use super::*;

#[test]
fn bit_reverse_mirrors_low_bits() {
    assert_eq!(bit_reverse(1, 8), 4);
    assert_eq!(bit_reverse(3, 8), 6);
    assert_eq!(bit_reverse(6, 8), 3);
    assert_eq!(bit_reverse(0, 8), 0);
    // Non power of two ranges use enough bits to count below the bound.
    assert_eq!(bit_reverse(1, 5), 4);
    assert_eq!(bit_reverse(0, 1), 0);
}

#[test]
fn pow2_helpers() {
    assert_eq!(largest_pow2(0), 0);
    assert_eq!(largest_pow2(1), 1);
    assert_eq!(largest_pow2(7), 4);
    assert_eq!(largest_pow2(8), 8);
}

#[test]
fn ortho_maps_box_to_unit_cube() {
    let m = matrix_ortho(0.0, 10.0, 0.0, 20.0, -1.0, 1.0);
    let p = matrix_vector_multiply(&m, &[10.0, 0.0, 0.0, 1.0]);
    assert!((p[0] - 1.0).abs() < 1e-12);
    assert!((p[1] + 1.0).abs() < 1e-12);
    let id = matrix_identity();
    assert_eq!(matrix_multiply(&id, &m), m);
    assert_eq!(matrix_multiply(&m, &id), m);
}
