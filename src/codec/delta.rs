//! Value transforms on the host-order fixed area, applied before compression.
//!
//! Packing scales doubles to whole steps, then stores relative fields as the
//! difference from their base in the same record, then stores delta fields as
//! the difference from the previous non-null row. Unpacking runs the three in
//! reverse. Integer arithmetic wraps; a scaled double is held as an i64 step
//! count while packed.

use crate::schema::{FieldKind, FieldLayout, Schema};

/// Integer view of a value while packed: int32, int64 or a step count.
fn read_int(field: &FieldLayout, record: &[u8]) -> i64 {
    match field.kind {
        FieldKind::Int32 => i64::from(field.read_i32(record)),
        _ => field.read_i64(record),
    }
}

/// Store `value` truncated to the field's width and return what was stored.
fn write_int(field: &FieldLayout, record: &mut [u8], value: i64) -> i64 {
    match field.kind {
        FieldKind::Int32 => {
            let value = value as i32;
            field.write_i32(record, value);
            i64::from(value)
        }
        _ => {
            field.write_i64(record, value);
            value
        }
    }
}

fn relative_pairs(schema: &Schema) -> impl Iterator<Item = (&FieldLayout, &FieldLayout)> {
    let fields = schema.fields();
    fields
        .iter()
        .filter_map(move |f| f.relative_to.and_then(|base| fields.get(base)).map(|base| (f, base)))
}

pub fn encode(fixed: &mut [u8], schema: &Schema) {
    let size = schema.record_size();
    for field in schema.fields() {
        let Some(step) = field.scale else { continue };
        for record in fixed.chunks_exact_mut(size) {
            if !field.is_null(record) {
                let steps = (field.read_f64(record) / step).round();
                field.write_i64(record, steps as i64);
            }
        }
    }

    for record in fixed.chunks_exact_mut(size) {
        for (field, base) in relative_pairs(schema) {
            if field.is_null(record) || base.is_null(record) {
                continue;
            }
            let diff = read_int(field, record).wrapping_sub(read_int(base, record));
            write_int(field, record, diff);
        }
    }

    for field in schema.fields().iter().filter(|f| f.delta) {
        let mut prev = 0i64;
        for record in fixed.chunks_exact_mut(size) {
            if field.is_null(record) {
                continue;
            }
            let value = read_int(field, record);
            write_int(field, record, value.wrapping_sub(prev));
            prev = value;
        }
    }
}

pub fn decode(fixed: &mut [u8], schema: &Schema) {
    let size = schema.record_size();
    for field in schema.fields().iter().filter(|f| f.delta) {
        let mut prev = 0i64;
        for record in fixed.chunks_exact_mut(size) {
            if field.is_null(record) {
                continue;
            }
            prev = write_int(field, record, read_int(field, record).wrapping_add(prev));
        }
    }

    for record in fixed.chunks_exact_mut(size) {
        for (field, base) in relative_pairs(schema) {
            if field.is_null(record) || base.is_null(record) {
                continue;
            }
            let value = read_int(field, record).wrapping_add(read_int(base, record));
            write_int(field, record, value);
        }
    }

    for field in schema.fields() {
        let Some(step) = field.scale else { continue };
        for record in fixed.chunks_exact_mut(size) {
            if !field.is_null(record) {
                let steps = field.read_i64(record);
                field.write_f64(record, steps as f64 * step);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Result;
    use crate::schema::{FieldSpec, SchemaDescriptor};

    #[test]
    fn test_delta_skips_nulls_and_wraps() {
        let schema = Schema::bind(
            SchemaDescriptor::new("delta")
                .field(FieldSpec::new("t", FieldKind::Int64).delta().nullable())
                .field(FieldSpec::new("n", FieldKind::Int32).delta()),
        )
        .unwrap();
        let (t, n) = (&schema.fields()[0], &schema.fields()[1]);
        let size = schema.record_size();
        let times = [Some(1000i64), None, Some(1010), Some(i64::MIN)];
        let counts = [i32::MAX, i32::MIN, 3, 3];

        let mut fixed = vec![0u8; size * times.len()];
        for (i, record) in fixed.chunks_exact_mut(size).enumerate() {
            match times[i] {
                Some(v) => t.write_i64(record, v),
                None => t.set_null(record, true),
            }
            n.write_i32(record, counts[i]);
        }
        let original = fixed.clone();

        encode(&mut fixed, &schema);
        assert_eq!(t.read_i64(&fixed[size * 2..]), 10);
        assert_eq!(n.read_i32(&fixed[size * 3..]), 0);

        decode(&mut fixed, &schema);
        assert_eq!(fixed, original);
    }

    #[test]
    fn test_relative_to_other_field() -> Result<()> {
        let schema = Schema::bind(
            SchemaDescriptor::new("span")
                .field(FieldSpec::new("start", FieldKind::Int32).delta())
                .field(FieldSpec::new("end", FieldKind::Int32).relative_to("start"))
                .field(FieldSpec::new("first", FieldKind::Int64).nullable())
                .field(FieldSpec::new("last", FieldKind::Int64).relative_to("first")),
        )?;
        let [start, end, first, last] = schema.fields() else {
            unreachable!()
        };
        let size = schema.record_size();
        let rows = [
            (100, 130, Some(7i64), 9i64),
            (i32::MAX, i32::MIN, None, 12),
            (140, 141, Some(i64::MAX), i64::MIN),
        ];

        let mut fixed = vec![0u8; size * rows.len()];
        for (record, &(s, e, f, l)) in fixed.chunks_exact_mut(size).zip(&rows) {
            start.write_i32(record, s);
            end.write_i32(record, e);
            match f {
                Some(f) => first.write_i64(record, f),
                None => first.set_null(record, true),
            }
            last.write_i64(record, l);
        }
        let original = fixed.clone();

        encode(&mut fixed, &schema);
        let record = &fixed[..size];
        assert_eq!(end.read_i32(record), 30);
        assert_eq!(last.read_i64(record), 2);
        // base is null: stored as is
        assert_eq!(last.read_i64(&fixed[size..]), 12);
        assert_eq!(end.read_i32(&fixed[size..]), 1);
        // the base is stored as a delta, the relative field against its value
        assert_eq!(start.read_i32(&fixed[size * 2..]), 140i32.wrapping_sub(i32::MAX));
        assert_eq!(end.read_i32(&fixed[size * 2..]), 1);

        decode(&mut fixed, &schema);
        assert_eq!(fixed, original);
        Ok(())
    }

    #[test]
    fn test_scaled_doubles() -> Result<()> {
        let schema = Schema::bind(
            SchemaDescriptor::new("timing")
                .field(FieldSpec::new("enter", FieldKind::Double).scale(1e-3).delta())
                .field(FieldSpec::new("leave", FieldKind::Double).scale(1e-3).relative_to("enter"))
                .field(FieldSpec::new("load", FieldKind::Double).scale(0.25).nullable()),
        )?;
        let [enter, leave, load] = schema.fields() else {
            unreachable!()
        };
        let size = schema.record_size();
        let rows = [
            (1_700_000_000.0004, 1_700_000_000.0121, Some(0.3)),
            (1_700_000_000.5, 1_700_000_001.25, None),
            (1_699_999_999.9996, 1_700_000_000.0, Some(-7.9)),
        ];

        let mut fixed = vec![0u8; size * rows.len()];
        for (record, &(a, b, c)) in fixed.chunks_exact_mut(size).zip(&rows) {
            enter.write_f64(record, a);
            leave.write_f64(record, b);
            match c {
                Some(c) => load.write_f64(record, c),
                None => load.set_null(record, true),
            }
        }

        encode(&mut fixed, &schema);
        let second = &fixed[size..];
        assert_eq!(enter.read_i64(second), 500);
        assert_eq!(leave.read_i64(second), 750);
        assert_eq!(load.read_i64(&fixed[size * 2..]), -32);

        decode(&mut fixed, &schema);
        let steps = |v: f64, step: f64| (v / step).round() * step;
        for (record, &(a, b, c)) in fixed.chunks_exact(size).zip(&rows) {
            assert_eq!(enter.read_f64(record), steps(a, 1e-3));
            assert_eq!(leave.read_f64(record), steps(b, 1e-3));
            match c {
                Some(c) => assert_eq!(load.read_f64(record), steps(c, 0.25)),
                None => assert!(load.is_null(record)),
            }
        }
        Ok(())
    }
}
