//! Field value tests: container addressing, variable sizes and deep clones.

use fuzzdsl::value::{
    BitfieldValue, BlockValue, CompoundBitfieldValue, CompoundValue, FieldValue, RepeatValue,
    VariableBlockValue,
};
use fuzzdsl::{Error, Field};
use proptest::prelude::*;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

fn blocks(sizes: &[usize]) -> Vec<Field> {
    sizes.iter().map(|&n| Field::new(BlockValue::new(n))).collect()
}

proptest! {
    #[test]
    fn compound_size_is_sum_of_children(sizes in prop::collection::vec(0usize..16, 0..12)) {
        let compound = CompoundValue::new(blocks(&sizes));
        prop_assert_eq!(compound.size(), sizes.iter().sum::<usize>());
        prop_assert_eq!(compound.len(), sizes.len());
    }

    #[test]
    fn cached_locate_matches_search(
        sizes in prop::collection::vec(0usize..8, 1..10),
        positions in prop::collection::vec(0usize..1000, 1..40),
    ) {
        let compound = CompoundValue::new(blocks(&sizes));
        let total = compound.size();
        for position in positions {
            if total == 0 {
                prop_assert!(compound.locate(position).is_err());
                continue;
            }
            let index = position % total;
            prop_assert_eq!(compound.locate(index), compound.locate_uncached(index));
            let (child, local) = compound.locate(index).unwrap();
            prop_assert!(local < sizes[child]);
        }
    }

    #[test]
    fn compound_writes_reach_children(sizes in prop::collection::vec(1usize..6, 1..6)) {
        let mut field = Field::new(CompoundValue::new(blocks(&sizes)));
        let content: Vec<u8> = (0..field.size()).map(|i| i as u8).collect();
        field.write_units(&content).unwrap();
        prop_assert_eq!(field.units().unwrap(), content.clone());
        let mut start = 0;
        for (child, &n) in field.children().iter().zip(&sizes) {
            prop_assert_eq!(child.units().unwrap(), content[start..start + n].to_vec());
            start += n;
        }
    }

    #[test]
    fn variable_block_within_bounds(min in 0usize..64, extra in 0usize..64, seed in any::<u64>()) {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let v = VariableBlockValue::new(min, min + extra, &mut rng).unwrap();
        prop_assert!(v.size() >= min && v.size() <= min + extra);
        prop_assert_eq!(v.bounds(), (min, min + extra));
    }

    #[test]
    fn compound_bitfield_size_rounds_up(widths in prop::collection::vec(1usize..20, 1..6)) {
        let fields = widths.iter().map(|&w| Field::new(BitfieldValue::new(w))).collect();
        let bits = CompoundBitfieldValue::new(fields);
        let total: usize = widths.iter().sum();
        prop_assert_eq!(bits.total_bits(), total);
        prop_assert_eq!(bits.size(), total.div_ceil(8));
    }
}

#[test]
fn variable_block_rejects_reversed_bounds() {
    let mut rng = ChaCha8Rng::seed_from_u64(0);
    assert_eq!(
        VariableBlockValue::new(3, 1, &mut rng).unwrap_err(),
        Error::InvalidBounds { min: 3, max: 1 }
    );
    let fixed = VariableBlockValue::new(5, 5, &mut rng).unwrap();
    assert_eq!(fixed.size(), 5);
}

#[test]
fn compound_out_of_range() {
    let compound = CompoundValue::new(blocks(&[2, 3]));
    assert_eq!(
        compound.get(5),
        Err(Error::InvalidIndex { index: 5, size: 5 })
    );
}

#[test]
fn compound_skips_empty_children() {
    let compound = CompoundValue::new(blocks(&[0, 2, 0, 0, 1]));
    assert_eq!(compound.locate(0), Ok((1, 0)));
    assert_eq!(compound.locate(1), Ok((1, 1)));
    assert_eq!(compound.locate(2), Ok((4, 0)));
}

#[test]
fn clones_are_independent() {
    let mut original = Field::new(CompoundValue::new(vec![
        Field::new(BlockValue::new(2)),
        Field::new(CompoundValue::new(blocks(&[1, 1]))),
    ]));
    original.write_units(&[1, 2, 3, 4]).unwrap();
    let mut copy = original.clone();
    copy.write_units(&[9, 9, 9, 9]).unwrap();
    assert_eq!(original.units().unwrap(), vec![1, 2, 3, 4]);
    assert_eq!(copy.units().unwrap(), vec![9, 9, 9, 9]);
}

#[test]
fn repeat_addresses_clones_in_order() {
    let prototype = Field::new(CompoundValue::new(blocks(&[2])));
    let mut repeat = Field::new(RepeatValue::new(vec![prototype; 3]));
    assert_eq!(repeat.size(), 6);
    repeat.write_units(&[0, 1, 2, 3, 4, 5]).unwrap();
    assert_eq!(repeat.children()[1].units().unwrap(), vec![2, 3]);
    assert_eq!(repeat.children()[2].units().unwrap(), vec![4, 5]);
}

#[test]
fn compound_bitfield_mixes_bits_and_bytes() {
    let mut field = Field::new(CompoundBitfieldValue::new(vec![
        Field::new(BitfieldValue::new(4)),
        Field::new(BlockValue::new(1)),
        Field::new(BitfieldValue::new(4)),
    ]));
    assert_eq!(field.size(), 2);
    field.write_units(&[0xab, 0xcd]).unwrap();
    let children = field.children();
    assert_eq!(children[0].units().unwrap(), vec![1, 0, 1, 0]);
    assert_eq!(children[1].units().unwrap(), vec![0xbc]);
    assert_eq!(children[2].units().unwrap(), vec![1, 1, 0, 1]);
    assert_eq!(field.to_bytes().unwrap(), vec![0xab, 0xcd]);
}

#[test]
fn write_wider_than_field() {
    let mut field = Field::new(BlockValue::new(2));
    assert_eq!(
        field.write_units(&[1, 2, 3]),
        Err(Error::InvalidFieldSize { len: 3, size: 2 })
    );
    assert_eq!(field.units().unwrap(), vec![0, 0]);
}
