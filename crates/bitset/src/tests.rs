use crate::{BitSet, GrowableBitSet, SparseBitMatrix};

#[test]
fn insert_remove_iter() {
    let mut set: BitSet<usize> = BitSet::new_empty(130);
    assert!(set.insert(0));
    assert!(set.insert(64));
    assert!(set.insert(129));
    assert!(!set.insert(64));
    assert_eq!(set.iter().collect::<Vec<_>>(), vec![0, 64, 129]);
    assert_eq!(set.count(), 3);

    assert!(set.remove(64));
    assert!(!set.remove(64));
    assert_eq!(set.iter().collect::<Vec<_>>(), vec![0, 129]);
}

#[test]
fn union_subtract_report_change() {
    let mut a: BitSet<usize> = BitSet::new_empty(100);
    let mut b: BitSet<usize> = BitSet::new_empty(100);
    a.insert(3);
    b.insert(5);
    b.insert(3);

    assert!(a.union(&b));
    assert!(!a.union(&b));
    assert!(a.superset(&b));

    assert!(a.subtract(&b));
    assert!(a.is_empty());
    assert!(!a.subtract(&b));
}

#[test]
fn filled_has_no_excess_bits() {
    let set: BitSet<usize> = BitSet::new_filled(67);
    assert_eq!(set.count(), 67);
    assert_eq!(set.iter().last(), Some(66));
}

#[test]
fn growable() {
    let mut set: GrowableBitSet<usize> = GrowableBitSet::new_empty();
    assert!(!set.contains(77));
    assert!(set.insert(77));
    assert!(set.contains(77));
    assert!(!set.insert(77));
}

#[test]
fn matrix_rows_and_inverse() {
    let mut matrix: SparseBitMatrix<usize, usize> = SparseBitMatrix::new(4, 70);
    assert!(matrix.row(2).is_none());
    matrix.insert(2, 66);
    matrix.insert(2, 1);
    matrix.insert(3, 1);

    assert!(matrix.contains(2, 66));
    assert!(!matrix.contains(1, 66));
    assert_eq!(matrix.iter(2).collect::<Vec<_>>(), vec![1, 66]);

    let inv = matrix.inverse();
    assert_eq!(inv.iter(1).collect::<Vec<_>>(), vec![2, 3]);
    assert_eq!(inv.iter(66).collect::<Vec<_>>(), vec![2]);

    assert!(matrix.union_rows(3, 2));
    assert!(!matrix.union_rows(3, 2));
    assert_eq!(matrix.iter(2).collect::<Vec<_>>(), vec![1, 66]);
}
