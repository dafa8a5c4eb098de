//! # Processor identification
//!
//! Two CPUID leaves are consulted during processor setup:
//!
//! - leaf `0x00` returns the vendor string in EBX, EDX, ECX,
//! - leaf `0x01` returns the signature in EAX and the classic feature flags in
//!   ECX and EDX.
//!
//! Decoding is a pure function of the raw leaves ([`decode`]) so it can be
//! exercised with canned values; [`identify`] runs the instruction through
//! [`ProcessorControl`].

use crate::processor::ProcessorControl;
use bitfield_struct::bitfield;

pub const LEAF_VENDOR: u32 = 0x00;
pub const LEAF_FEATURES: u32 = 0x01;

/// `"Auth"`, the first four bytes of `AuthenticAMD`.
const VENDOR_EBX_AMD: u32 = 0x6874_7541;

/// `"Genu"`, the first four bytes of `GenuineIntel`.
const VENDOR_EBX_INTEL: u32 = 0x756E_6547;

/// Raw register values returned by one CPUID leaf.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
#[repr(C)]
pub struct CpuidResult {
    pub eax: u32,
    pub ebx: u32,
    pub ecx: u32,
    pub edx: u32,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Default)]
pub enum CpuVendor {
    Amd,
    Intel,
    #[default]
    Unknown,
}

impl CpuVendor {
    /// Classifies by the first vendor dword.
    #[must_use]
    pub const fn from_ebx(ebx: u32) -> Self {
        match ebx {
            VENDOR_EBX_AMD => Self::Amd,
            VENDOR_EBX_INTEL => Self::Intel,
            _ => Self::Unknown,
        }
    }

    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Amd => "AMD",
            Self::Intel => "Intel",
            Self::Unknown => "Unknown",
        }
    }
}

/// CPUID.01H:EAX, the processor signature.
#[bitfield(u32)]
#[derive(PartialEq, Eq)]
pub struct CpuSignature {
    #[bits(4)]
    pub stepping: u8,
    #[bits(4)]
    pub model: u8,
    #[bits(4)]
    pub family: u8,
    #[bits(4)]
    __reserved_12_15: u8,
    #[bits(4)]
    pub extended_model: u8,
    pub extended_family: u8,
    #[bits(4)]
    __reserved_28_31: u8,
}

/// CPUID.01H:ECX feature flags.
#[bitfield(u32)]
#[derive(PartialEq, Eq)]
pub struct FeaturesEcx {
    pub sse3: bool,
    pub pclmul: bool,
    pub dtes64: bool,
    pub monitor: bool,
    pub ds_cpl: bool,
    pub vmx: bool,
    pub smx: bool,
    pub est: bool,
    pub tm2: bool,
    pub ssse3: bool,
    pub cid: bool,
    pub sdbg: bool,
    pub fma: bool,
    pub cx16: bool,
    pub xtpr: bool,
    pub pdcm: bool,
    __reserved_16: bool,
    pub pcid: bool,
    pub dca: bool,
    pub sse4_1: bool,
    pub sse4_2: bool,
    pub x2apic: bool,
    pub movbe: bool,
    pub popcnt: bool,
    /// TSC deadline timer.
    pub tsc: bool,
    pub aes: bool,
    pub xsave: bool,
    pub osxsave: bool,
    pub avx: bool,
    pub f16c: bool,
    pub rdrand: bool,
    pub hypervisor: bool,
}

/// CPUID.01H:EDX feature flags.
#[bitfield(u32)]
#[derive(PartialEq, Eq)]
pub struct FeaturesEdx {
    pub fpu: bool,
    pub vme: bool,
    pub de: bool,
    pub pse: bool,
    pub tsc: bool,
    pub msr: bool,
    pub pae: bool,
    pub mce: bool,
    pub cx8: bool,
    pub apic: bool,
    __reserved_10: bool,
    pub sep: bool,
    pub mtrr: bool,
    pub pge: bool,
    pub mca: bool,
    pub cmov: bool,
    pub pat: bool,
    pub pse36: bool,
    pub psn: bool,
    pub clflush: bool,
    __reserved_20: bool,
    pub ds: bool,
    pub acpi: bool,
    pub mmx: bool,
    pub fxsr: bool,
    pub sse: bool,
    pub sse2: bool,
    pub ss: bool,
    pub htt: bool,
    pub tm: bool,
    pub ia64: bool,
    pub pbe: bool,
}

/// Feature flags from leaf 1.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct CpuFeatures {
    pub ecx: FeaturesEcx,
    pub edx: FeaturesEdx,
}

/// What processor setup learns about the CPU.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct CpuIdentification {
    pub family: u16,
    pub model: u16,
    pub stepping: u16,
    pub vendor: CpuVendor,
    /// 12 ASCII bytes, NUL padded.
    pub vendor_name: [u8; 13],
    pub features: CpuFeatures,
}

impl CpuIdentification {
    pub const UNKNOWN: Self = Self {
        family: 0,
        model: 0,
        stepping: 0,
        vendor: CpuVendor::Unknown,
        vendor_name: [0; 13],
        features: CpuFeatures {
            ecx: FeaturesEcx::new(),
            edx: FeaturesEdx::new(),
        },
    };

    /// The vendor string, if it is valid ASCII.
    #[must_use]
    pub fn vendor_name(&self) -> &str {
        let len = self.vendor_name.iter().position(|&b| b == 0).unwrap_or(12);
        core::str::from_utf8(&self.vendor_name[..len]).unwrap_or("")
    }
}

/// Composes family, model and stepping the way each vendor documents it.
#[must_use]
pub fn compose_signature(vendor: CpuVendor, signature: CpuSignature) -> (u16, u16, u16) {
    let base_family = u16::from(signature.family());
    let mut family = base_family;
    let mut model = u16::from(signature.model());
    let stepping = u16::from(signature.stepping());
    let extended_model = u16::from(signature.extended_model()) << 4;

    match vendor {
        CpuVendor::Amd => {
            if family >= 0xF {
                family += u16::from(signature.extended_family());
                model += extended_model;
            }
        }
        CpuVendor::Intel => {
            if family == 0xF {
                family += u16::from(signature.extended_family());
            }
            if base_family == 0x6 || base_family == 0xF {
                model += extended_model;
            }
        }
        CpuVendor::Unknown => {}
    }

    (family, model, stepping)
}

/// Builds the identification from the raw vendor and feature leaves.
#[must_use]
pub fn decode(vendor_leaf: CpuidResult, feature_leaf: CpuidResult) -> CpuIdentification {
    let vendor = CpuVendor::from_ebx(vendor_leaf.ebx);

    let mut vendor_name = [0u8; 13];
    for (chunk, reg) in vendor_name
        .chunks_exact_mut(4)
        .zip([vendor_leaf.ebx, vendor_leaf.edx, vendor_leaf.ecx])
    {
        chunk.copy_from_slice(&reg.to_le_bytes());
    }

    let (family, model, stepping) =
        compose_signature(vendor, CpuSignature::from_bits(feature_leaf.eax));

    CpuIdentification {
        family,
        model,
        stepping,
        vendor,
        vendor_name,
        features: CpuFeatures {
            ecx: FeaturesEcx::from_bits(feature_leaf.ecx),
            edx: FeaturesEdx::from_bits(feature_leaf.edx),
        },
    }
}

/// Queries and decodes the identification of the executing processor.
pub fn identify<P: ProcessorControl + ?Sized>(cpu: &mut P) -> CpuIdentification {
    let vendor_leaf = cpu.cpuid(LEAF_VENDOR);
    let feature_leaf = cpu.cpuid(LEAF_FEATURES);
    let id = decode(vendor_leaf, feature_leaf);
    log::info!(
        "CPU: {} ({}) family {:#x} model {:#x} stepping {}",
        id.vendor_name(),
        id.vendor.as_str(),
        id.family,
        id.model,
        id.stepping
    );
    id
}
