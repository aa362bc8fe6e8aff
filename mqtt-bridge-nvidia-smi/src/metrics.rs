//! Metric descriptions for `dmon` columns.

/// How a metric column is presented to Home Assistant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetricDescriptor {
    /// Column name in the `dmon` header, e.g. `pwr`.
    pub code: &'static str,
    /// Entity display name.
    pub name: &'static str,
    /// Home Assistant device class, if one applies.
    pub device_class: Option<&'static str>,
    /// Unit of measurement, if any.
    pub unit: Option<&'static str>,
}

const fn metric(
    code: &'static str,
    name: &'static str,
    device_class: Option<&'static str>,
    unit: &'static str,
) -> MetricDescriptor {
    MetricDescriptor {
        code,
        name,
        device_class,
        unit: Some(unit),
    }
}

/// Columns reported by `nvidia-smi dmon -s pucvmet`, in discovery order.
pub const METRICS: &[MetricDescriptor] = &[
    // p: power and temperature
    metric("pwr", "Power Usage", Some("power"), "W"),
    metric("gtemp", "GPU Temp", Some("temperature"), "°C"),
    metric("mtemp", "Memory Temp", Some("temperature"), "°C"),
    // u: utilisation
    metric("sm", "SM Util", None, "%"),
    metric("mem", "Memory Util", None, "%"),
    metric("enc", "Encoder Util", None, "%"),
    metric("dec", "Decoder Util", None, "%"),
    metric("jpg", "JPEG Util", None, "%"),
    metric("ofa", "Optical Flow Util", None, "%"),
    // c: clocks
    metric("mclk", "Memory Clock", Some("frequency"), "MHz"),
    metric("pclk", "Processor Clock", Some("frequency"), "MHz"),
    // v: violations
    metric("pviol", "Power Violation", None, "%"),
    metric("tviol", "Thermal Violation", None, "bool"),
    // m: memory
    metric("fb", "FB Memory Usage", Some("data_size"), "MB"),
    metric("bar1", "BAR1 Memory Usage", Some("data_size"), "MB"),
    metric("ccpm", "CCPM Memory Usage", Some("data_size"), "MB"),
    // e: ECC
    metric("sbecc", "Single Bit ECC Errors", None, "errs"),
    metric("dbecc", "Double Bit ECC Errors", None, "errs"),
    // t: PCIe throughput
    metric("pci", "PCI Throughput", Some("data_rate"), "MB/s"),
    metric("rxpci", "PCI RX", Some("data_rate"), "MB/s"),
    metric("txpci", "PCI TX", Some("data_rate"), "MB/s"),
];

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_codes_are_unique() {
        let codes: HashSet<_> = METRICS.iter().map(|m| m.code).collect();
        assert_eq!(codes.len(), METRICS.len());
    }

    #[test]
    fn test_power_descriptor() {
        let pwr = METRICS.iter().find(|m| m.code == "pwr").unwrap();
        assert_eq!(pwr.name, "Power Usage");
        assert_eq!(pwr.device_class, Some("power"));
        assert_eq!(pwr.unit, Some("W"));

        assert!(METRICS.iter().all(|m| m.code != "gpu"));
    }
}
