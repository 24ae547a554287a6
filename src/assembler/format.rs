// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Erik van der Tier

//! Output format handlers.
//!
//! A handler owns the mapping from kernel/section names to section ids
//! and decides which format-specific pseudo-ops exist. Section contents
//! live in the driver's section table; handlers only create entries and
//! route switches. Three formats exist: raw code dumps, AMD Catalyst
//! and GalliumCompute.

use std::collections::HashMap;
use std::io::{self, Write};

use crate::core::error::{AsmError, AsmErrorKind};
use crate::core::literal;

use super::symbol::ASMKERN_GLOBAL;

/// Section flag: content bytes may be emitted into the section.
pub const ASMSECT_WRITABLE: u32 = 1;
/// Section flag: symbols defined in the section resolve to absolute
/// values instead of section-relative ones.
pub const ASMSECT_ABS_ADDRESSABLE: u32 = 2;

/// Output container formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryFormat {
    Amd,
    Gallium,
    RawCode,
}

/// Target GPU device types of the GCN family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GpuDeviceType {
    CapeVerde,
    Pitcairn,
    Tahiti,
    Oland,
    Bonaire,
    Spectre,
    Spooky,
    Kalindi,
    Hainan,
    Hawaii,
}

impl GpuDeviceType {
    pub fn from_name(name: &str) -> Option<Self> {
        Some(match name.to_ascii_lowercase().as_str() {
            "capeverde" => GpuDeviceType::CapeVerde,
            "pitcairn" => GpuDeviceType::Pitcairn,
            "tahiti" => GpuDeviceType::Tahiti,
            "oland" => GpuDeviceType::Oland,
            "bonaire" => GpuDeviceType::Bonaire,
            "spectre" => GpuDeviceType::Spectre,
            "spooky" => GpuDeviceType::Spooky,
            "kalindi" => GpuDeviceType::Kalindi,
            "hainan" => GpuDeviceType::Hainan,
            "hawaii" => GpuDeviceType::Hawaii,
            _ => return None,
        })
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            GpuDeviceType::CapeVerde => "CapeVerde",
            GpuDeviceType::Pitcairn => "Pitcairn",
            GpuDeviceType::Tahiti => "Tahiti",
            GpuDeviceType::Oland => "Oland",
            GpuDeviceType::Bonaire => "Bonaire",
            GpuDeviceType::Spectre => "Spectre",
            GpuDeviceType::Spooky => "Spooky",
            GpuDeviceType::Kalindi => "Kalindi",
            GpuDeviceType::Hainan => "Hainan",
            GpuDeviceType::Hawaii => "Hawaii",
        }
    }
}

/// Logical type of a section.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AsmSectionType {
    Data,
    Code,
    Config,
    AmdHeader,
    AmdMetadata,
    GalliumComment,
    GalliumDisasm,
}

/// A logical output container: bytes plus attribution.
#[derive(Debug, Clone)]
pub struct AsmSection {
    pub kernel_id: u32,
    pub section_type: AsmSectionType,
    pub content: Vec<u8>,
}

impl AsmSection {
    fn new(kernel_id: u32, section_type: AsmSectionType) -> Self {
        Self {
            kernel_id,
            section_type,
            content: Vec::new(),
        }
    }
}

/// Per-kernel configuration collected by the AMD `.config` pseudo-ops.
#[derive(Debug, Clone, Default)]
pub struct KernelConfig {
    pub dims: Option<u64>,
    pub sgprs_num: Option<u64>,
    pub vgprs_num: Option<u64>,
    pub hw_local_size: u64,
    pub scratch_buffer: u64,
    pub float_mode: Option<u64>,
    pub ieee_mode: bool,
}

/// Result of a handled format-specific pseudo-op.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerOutcome {
    Handled,
    SwitchSection(u32),
}

struct AmdKernelState {
    name: String,
    header_section: Option<u32>,
    metadata_section: Option<u32>,
    data_section: Option<u32>,
    code_section: u32,
    config: KernelConfig,
}

pub struct AmdCatalystHandler {
    global_data_section: u32,
    kernels: Vec<AmdKernelState>,
    kernel_names: HashMap<String, u32>,
}

pub struct GalliumHandler {
    code_section: u32,
    comment_section: Option<u32>,
    disasm_section: Option<u32>,
    kernels: Vec<(String, u64)>,
    kernel_names: HashMap<String, u32>,
}

pub struct RawCodeHandler {
    code_section: u32,
}

/// The format dispatch. Operations shared by all three formats:
/// `add_kernel`, `add_section`, `section_flags`, `parse_pseudo_op` and
/// `write_binary`.
pub enum AsmFormatHandler {
    RawCode(RawCodeHandler),
    Amd(AmdCatalystHandler),
    Gallium(GalliumHandler),
}

impl AsmFormatHandler {
    /// Create the handler and its default sections; returns the handler
    /// and the initial current section id.
    pub fn new(format: BinaryFormat, sections: &mut Vec<AsmSection>) -> (Self, u32) {
        match format {
            BinaryFormat::RawCode => {
                let code = push_section(sections, ASMKERN_GLOBAL, AsmSectionType::Code);
                (AsmFormatHandler::RawCode(RawCodeHandler { code_section: code }), code)
            }
            BinaryFormat::Amd => {
                let data = push_section(sections, ASMKERN_GLOBAL, AsmSectionType::Data);
                (
                    AsmFormatHandler::Amd(AmdCatalystHandler {
                        global_data_section: data,
                        kernels: Vec::new(),
                        kernel_names: HashMap::new(),
                    }),
                    data,
                )
            }
            BinaryFormat::Gallium => {
                let code = push_section(sections, ASMKERN_GLOBAL, AsmSectionType::Code);
                (
                    AsmFormatHandler::Gallium(GalliumHandler {
                        code_section: code,
                        comment_section: None,
                        disasm_section: None,
                        kernels: Vec::new(),
                        kernel_names: HashMap::new(),
                    }),
                    code,
                )
            }
        }
    }

    /// Add a kernel; returns `(kernel_id, section_id)` of the kernel's
    /// code section.
    pub fn add_kernel(
        &mut self,
        name: &str,
        sections: &mut Vec<AsmSection>,
    ) -> Result<(u32, u32), AsmError> {
        match self {
            AsmFormatHandler::RawCode(_) => Err(AsmError::new(
                AsmErrorKind::Handler,
                "Kernels are not allowed in raw code format",
            )),
            AsmFormatHandler::Amd(h) => {
                if h.kernel_names.contains_key(name) {
                    return Err(AsmError::new(
                        AsmErrorKind::Handler,
                        format!("Kernel '{}' is already defined", name),
                    ));
                }
                let kernel_id = h.kernels.len() as u32;
                let code = push_section(sections, kernel_id, AsmSectionType::Code);
                h.kernels.push(AmdKernelState {
                    name: name.to_string(),
                    header_section: None,
                    metadata_section: None,
                    data_section: None,
                    code_section: code,
                    config: KernelConfig::default(),
                });
                h.kernel_names.insert(name.to_string(), kernel_id);
                Ok((kernel_id, code))
            }
            AsmFormatHandler::Gallium(h) => {
                if h.kernel_names.contains_key(name) {
                    return Err(AsmError::new(
                        AsmErrorKind::Handler,
                        format!("Kernel '{}' is already defined", name),
                    ));
                }
                let kernel_id = h.kernels.len() as u32;
                let offset = sections[h.code_section as usize].content.len() as u64;
                h.kernels.push((name.to_string(), offset));
                h.kernel_names.insert(name.to_string(), kernel_id);
                Ok((kernel_id, h.code_section))
            }
        }
    }

    /// Resolve a section name (for `.section`, `.text`, `.data`) in the
    /// given kernel scope, creating the section on first use.
    pub fn add_section(
        &mut self,
        name: &str,
        kernel_id: u32,
        sections: &mut Vec<AsmSection>,
    ) -> Result<u32, AsmError> {
        match self {
            AsmFormatHandler::RawCode(h) => {
                if name == ".text" {
                    Ok(h.code_section)
                } else {
                    Err(AsmError::new(
                        AsmErrorKind::Handler,
                        "Only '.text' section is allowed in raw code format",
                    ))
                }
            }
            AsmFormatHandler::Amd(h) => {
                if kernel_id == ASMKERN_GLOBAL {
                    return match name {
                        ".data" | ".globaldata" => Ok(h.global_data_section),
                        _ => Err(AsmError::new(
                            AsmErrorKind::Handler,
                            format!("Unknown section '{}' in global space", name),
                        )),
                    };
                }
                let kernel = h.kernels.get_mut(kernel_id as usize).ok_or_else(|| {
                    AsmError::new(AsmErrorKind::Handler, "Unknown kernel")
                })?;
                match name {
                    ".header" => Ok(get_or_create(
                        &mut kernel.header_section,
                        sections,
                        kernel_id,
                        AsmSectionType::AmdHeader,
                    )),
                    ".metadata" => Ok(get_or_create(
                        &mut kernel.metadata_section,
                        sections,
                        kernel_id,
                        AsmSectionType::AmdMetadata,
                    )),
                    ".data" => Ok(get_or_create(
                        &mut kernel.data_section,
                        sections,
                        kernel_id,
                        AsmSectionType::Data,
                    )),
                    ".text" => Ok(kernel.code_section),
                    _ => Err(AsmError::new(
                        AsmErrorKind::Handler,
                        format!("Unknown section '{}'", name),
                    )),
                }
            }
            AsmFormatHandler::Gallium(h) => match name {
                ".text" => Ok(h.code_section),
                ".comment" => Ok(get_or_create(
                    &mut h.comment_section,
                    sections,
                    ASMKERN_GLOBAL,
                    AsmSectionType::GalliumComment,
                )),
                ".disasm" => Ok(get_or_create(
                    &mut h.disasm_section,
                    sections,
                    ASMKERN_GLOBAL,
                    AsmSectionType::GalliumDisasm,
                )),
                _ => Err(AsmError::new(
                    AsmErrorKind::Handler,
                    format!("Unknown section '{}'", name),
                )),
            },
        }
    }

    /// Section attribute flags.
    pub fn section_flags(&self, section_id: u32, sections: &[AsmSection]) -> u32 {
        let section_type = match sections.get(section_id as usize) {
            Some(s) => s.section_type,
            None => return 0,
        };
        match (self, section_type) {
            (AsmFormatHandler::Amd(_), AsmSectionType::Data) => {
                ASMSECT_WRITABLE | ASMSECT_ABS_ADDRESSABLE
            }
            (_, AsmSectionType::Config) => 0,
            _ => ASMSECT_WRITABLE,
        }
    }

    /// Try a format-specific pseudo-op. `name` comes without the
    /// leading dot; `args` is the raw argument text. Returns `Ok(None)`
    /// when the op is not recognized by this format.
    pub fn parse_pseudo_op(
        &mut self,
        name: &str,
        args: &[u8],
        current_kernel: u32,
        sections: &mut Vec<AsmSection>,
    ) -> Result<Option<HandlerOutcome>, AsmError> {
        match self {
            AsmFormatHandler::RawCode(_) => Ok(None),
            AsmFormatHandler::Amd(h) => h.parse_pseudo_op(name, args, current_kernel, sections),
            AsmFormatHandler::Gallium(_) => {
                let section_name = match name {
                    "comment" => ".comment",
                    "disasm" => ".disasm",
                    _ => return Ok(None),
                };
                self.add_section(section_name, ASMKERN_GLOBAL, sections)
                    .map(|id| Some(HandlerOutcome::SwitchSection(id)))
            }
        }
    }

    /// Emit the handler-dependent binary container.
    pub fn write_binary(&self, sections: &[AsmSection], out: &mut dyn Write) -> io::Result<()> {
        match self {
            AsmFormatHandler::RawCode(h) => {
                out.write_all(&sections[h.code_section as usize].content)
            }
            AsmFormatHandler::Amd(h) => {
                out.write_all(&sections[h.global_data_section as usize].content)?;
                for kernel in &h.kernels {
                    for id in [
                        kernel.header_section,
                        kernel.metadata_section,
                        kernel.data_section,
                        Some(kernel.code_section),
                    ]
                    .into_iter()
                    .flatten()
                    {
                        out.write_all(&sections[id as usize].content)?;
                    }
                }
                Ok(())
            }
            AsmFormatHandler::Gallium(h) => {
                out.write_all(&sections[h.code_section as usize].content)?;
                for id in [h.comment_section, h.disasm_section].into_iter().flatten() {
                    out.write_all(&sections[id as usize].content)?;
                }
                Ok(())
            }
        }
    }

    /// Kernel names in definition order, for reports.
    pub fn kernel_names(&self) -> Vec<&str> {
        match self {
            AsmFormatHandler::RawCode(_) => Vec::new(),
            AsmFormatHandler::Amd(h) => h.kernels.iter().map(|k| k.name.as_str()).collect(),
            AsmFormatHandler::Gallium(h) => h.kernels.iter().map(|(n, _)| n.as_str()).collect(),
        }
    }
}

impl AmdCatalystHandler {
    fn parse_pseudo_op(
        &mut self,
        name: &str,
        args: &[u8],
        current_kernel: u32,
        sections: &mut Vec<AsmSection>,
    ) -> Result<Option<HandlerOutcome>, AsmError> {
        match name {
            "globaldata" => Ok(Some(HandlerOutcome::SwitchSection(
                self.global_data_section,
            ))),
            "header" | "metadata" | "data" | "text" => {
                if current_kernel == ASMKERN_GLOBAL {
                    if name == "data" {
                        return Ok(Some(HandlerOutcome::SwitchSection(
                            self.global_data_section,
                        )));
                    }
                    return Err(AsmError::new(
                        AsmErrorKind::Handler,
                        format!("'.{}' is allowed only inside a kernel", name),
                    ));
                }
                let kernel = self.kernels.get_mut(current_kernel as usize).ok_or_else(
                    || AsmError::new(AsmErrorKind::Handler, "Unknown kernel"),
                )?;
                let id = match name {
                    "header" => get_or_create(
                        &mut kernel.header_section,
                        sections,
                        current_kernel,
                        AsmSectionType::AmdHeader,
                    ),
                    "metadata" => get_or_create(
                        &mut kernel.metadata_section,
                        sections,
                        current_kernel,
                        AsmSectionType::AmdMetadata,
                    ),
                    "data" => get_or_create(
                        &mut kernel.data_section,
                        sections,
                        current_kernel,
                        AsmSectionType::Data,
                    ),
                    _ => kernel.code_section,
                };
                Ok(Some(HandlerOutcome::SwitchSection(id)))
            }
            "config" => {
                self.kernel_mut(current_kernel, ".config")?;
                Ok(Some(HandlerOutcome::Handled))
            }
            "dims" => {
                let value = parse_config_value(args, ".dims")?;
                if !(1..=3).contains(&value) {
                    return Err(AsmError::new(
                        AsmErrorKind::Handler,
                        "'.dims' accepts 1, 2 or 3 dimensions",
                    ));
                }
                self.kernel_mut(current_kernel, ".dims")?.config.dims = Some(value);
                Ok(Some(HandlerOutcome::Handled))
            }
            "sgprsnum" => {
                let value = parse_config_value(args, ".sgprsnum")?;
                self.kernel_mut(current_kernel, ".sgprsnum")?.config.sgprs_num = Some(value);
                Ok(Some(HandlerOutcome::Handled))
            }
            "vgprsnum" => {
                let value = parse_config_value(args, ".vgprsnum")?;
                self.kernel_mut(current_kernel, ".vgprsnum")?.config.vgprs_num = Some(value);
                Ok(Some(HandlerOutcome::Handled))
            }
            "localsize" => {
                let value = parse_config_value(args, ".localsize")?;
                self.kernel_mut(current_kernel, ".localsize")?
                    .config
                    .hw_local_size = value;
                Ok(Some(HandlerOutcome::Handled))
            }
            "scratchbuffer" => {
                let value = parse_config_value(args, ".scratchbuffer")?;
                self.kernel_mut(current_kernel, ".scratchbuffer")?
                    .config
                    .scratch_buffer = value;
                Ok(Some(HandlerOutcome::Handled))
            }
            "floatmode" => {
                let value = parse_config_value(args, ".floatmode")?;
                self.kernel_mut(current_kernel, ".floatmode")?.config.float_mode = Some(value);
                Ok(Some(HandlerOutcome::Handled))
            }
            "ieeemode" => {
                self.kernel_mut(current_kernel, ".ieeemode")?.config.ieee_mode = true;
                Ok(Some(HandlerOutcome::Handled))
            }
            _ => Ok(None),
        }
    }

    fn kernel_mut(
        &mut self,
        current_kernel: u32,
        op: &str,
    ) -> Result<&mut AmdKernelState, AsmError> {
        if current_kernel == ASMKERN_GLOBAL {
            return Err(AsmError::new(
                AsmErrorKind::Handler,
                format!("'{}' is allowed only inside a kernel", op),
            ));
        }
        self.kernels
            .get_mut(current_kernel as usize)
            .ok_or_else(|| AsmError::new(AsmErrorKind::Handler, "Unknown kernel"))
    }

    /// Configuration collected for a kernel, for tests and reports.
    pub fn kernel_config(&self, kernel_id: u32) -> Option<&KernelConfig> {
        self.kernels.get(kernel_id as usize).map(|k| &k.config)
    }
}

fn push_section(sections: &mut Vec<AsmSection>, kernel_id: u32, t: AsmSectionType) -> u32 {
    sections.push(AsmSection::new(kernel_id, t));
    (sections.len() - 1) as u32
}

fn get_or_create(
    slot: &mut Option<u32>,
    sections: &mut Vec<AsmSection>,
    kernel_id: u32,
    t: AsmSectionType,
) -> u32 {
    match slot {
        Some(id) => *id,
        None => {
            let id = push_section(sections, kernel_id, t);
            *slot = Some(id);
            id
        }
    }
}

fn parse_config_value(args: &[u8], op: &str) -> Result<u64, AsmError> {
    let trimmed: Vec<u8> = args
        .iter()
        .copied()
        .filter(|b| !b.is_ascii_whitespace())
        .collect();
    let mut pos = 0;
    let value = literal::parse_literal(&trimmed, &mut pos).map_err(|_| {
        AsmError::new(
            AsmErrorKind::Handler,
            format!("'{}' requires a numeric argument", op),
        )
    })?;
    if pos != trimmed.len() {
        return Err(AsmError::new(
            AsmErrorKind::Handler,
            format!("Garbage after '{}' argument", op),
        ));
    }
    Ok(value)
}
