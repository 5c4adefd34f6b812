use crate::pb::{memory::Unit, Filter, Laptop, Memory};

/// Returns true when the laptop satisfies every threshold of the filter.
pub fn matches_filter(filter: &Filter, laptop: &Laptop) -> bool {
    if laptop.price_usd > filter.max_price_usd {
        return false;
    }

    let (cores, max_ghz) = laptop
        .cpu
        .as_ref()
        .map(|cpu| (cpu.number_of_cores, cpu.maximum_frequency))
        .unwrap_or((0, 0.0));

    if cores < filter.min_cpu_cores {
        return false;
    }

    if max_ghz < filter.min_cpu_ghz {
        return false;
    }

    to_bits(laptop.ram.as_ref()) >= to_bits(filter.min_ram.as_ref())
}

/// Normalizes a memory size to bits. Missing or unknown units count as zero.
pub fn to_bits(memory: Option<&Memory>) -> u64 {
    let Some(memory) = memory else {
        return 0;
    };
    let shift = match Unit::try_from(memory.unit).unwrap_or(Unit::Unknown) {
        Unit::Bit => 0,
        Unit::Byte => 3,
        Unit::Kilobyte => 13,
        Unit::Megabyte => 23,
        Unit::Gigabyte => 33,
        Unit::Terabyte => 43,
        Unit::Unknown => return 0,
    };
    memory.value.saturating_mul(1u64 << shift)
}
