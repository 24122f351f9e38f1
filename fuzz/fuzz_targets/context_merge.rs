#![no_main]

use ferrous_scope::AmbientContext;
use libfuzzer_sys::fuzz_target;

struct SlotA(u8);
struct SlotB(u8);
struct SlotC(u8);

fuzz_target!(|data: &[u8]| {
    // Interpret the input as alternating layer breaks and typed entries,
    // then check that lookup always returns the innermost entry per type
    // and that merging never loses or reorders entries.
    let mut layers: Vec<Vec<(u8, u8)>> = vec![Vec::new()];
    for chunk in data.chunks(2) {
        let slot = chunk[0] % 4;
        let value = chunk.get(1).copied().unwrap_or(0);
        if slot == 3 {
            if layers.len() >= 8 {
                break;
            }
            layers.push(Vec::new());
        } else if let Some(layer) = layers.last_mut() {
            if layer.len() < 8 {
                layer.push((slot, value));
            }
        }
    }

    let merged = layers.iter().fold(AmbientContext::new(), |outer, layer| {
        layer
            .iter()
            .fold(AmbientContext::new(), |ctx, (slot, value)| match slot {
                0 => ctx.with(SlotA(*value)),
                1 => ctx.with(SlotB(*value)),
                _ => ctx.with(SlotC(*value)),
            })
            .merged_over(&outer)
    });

    let expected = |slot: u8| {
        layers
            .iter()
            .rev()
            .flat_map(|layer| layer.iter().rev())
            .find(|(s, _)| *s == slot)
            .map(|(_, v)| *v)
    };

    assert_eq!(merged.get::<SlotA>().map(|v| v.0), expected(0));
    assert_eq!(merged.get::<SlotB>().map(|v| v.0), expected(1));
    assert_eq!(merged.get::<SlotC>().map(|v| v.0), expected(2));

    let total: usize = layers.iter().map(|l| l.len()).sum();
    assert_eq!(merged.len(), total);
});
