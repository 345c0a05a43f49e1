//! Linear Advance (pressure advance) tower post-processing.
//!
//! Each tower section prints with its own K-factor: the first layer of a section gets an
//! `M900 K<value>` setter, and any `M900` the slicer left inside a section is commented out so
//! it can't change the K-factor mid-section.

use regex::Regex;
use tracing::{debug, info};

use crate::{enumerate_layers, line_ending, CommentPolicy, GcodeProgram, KFactor, LayerRole, Mm, TowerGeometry, COMMENT_PREFIX};

/// Version written into the G-code header of every processed tower.
pub const SCRIPT_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Offset of inserted lines from a layer's leading marker. Index 0 is the marker itself and
/// index 1 the slicer's first line of layer metadata; both are read by other tools.
pub const SETTING_LINE_OFFSET: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LinearAdvanceParameters {
    pub geometry: TowerGeometry,
    /// K-factor of the first section.
    pub start_kfactor: KFactor,
    /// Added per section; negative to sweep downwards.
    pub kfactor_change: KFactor,
    /// Also show the K-factor of each section on the printer's display (`M117`).
    pub enable_lcd_messages: bool,
    pub enable_advanced_gcode_comments: bool,
}

impl Default for LinearAdvanceParameters {
    fn default() -> Self {
        LinearAdvanceParameters {
            geometry: TowerGeometry::default(),
            start_kfactor: 0.0,
            kfactor_change: 0.02,
            enable_lcd_messages: false,
            enable_advanced_gcode_comments: true,
        }
    }
}

/// What a pass did to a program.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct SectionReport {
    /// The K-factor set at the start of each section, in print order.
    pub kfactors: Vec<KFactor>,
    /// Slicer `M900` lines commented out inside sections.
    pub neutralized_lines: usize,
}

impl SectionReport {
    pub fn sections(&self) -> usize {
        self.kfactors.len()
    }
}

/// The K-factor a pass is currently printing with, and the section it belongs to.
#[derive(Debug, Clone, Copy, PartialEq)]
struct SectionState {
    current_kfactor: KFactor,
    section: Option<usize>,
}

impl SectionState {
    // Starts one step back so the first section lands on `start_kfactor`.
    fn new(parameters: &LinearAdvanceParameters) -> Self {
        SectionState { current_kfactor: parameters.start_kfactor - parameters.kfactor_change, section: None }
    }

    fn enter(&mut self, section: usize, kfactor_change: KFactor) -> KFactor {
        self.current_kfactor += kfactor_change;
        self.section = Some(section);
        self.current_kfactor
    }
}

/// Matches lines that set the K-factor, including ones already disabled with leading `;`.
#[derive(Debug, Clone)]
pub struct KFactorLineMatcher {
    m900: Regex,
}

impl Default for KFactorLineMatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl KFactorLineMatcher {
    pub fn new() -> KFactorLineMatcher {
        KFactorLineMatcher {
            m900: Regex::new(r"(?i)^\s*;*\s*M900(?:[^0-9.]|$)").unwrap(),
        }
    }

    pub fn is_kfactor_change(&self, line: &str) -> bool {
        self.m900.is_match(line)
    }
}

/// K-factors as written into G-code: at least two and at most four decimals.
pub fn format_kfactor(kfactor: KFactor) -> String {
    // Avoid "-0.00" from accumulated rounding around zero.
    let kfactor = if kfactor.abs() < 0.00005 { 0.0 } else { kfactor };
    let mut text = format!("{:.4}", kfactor);
    while text.ends_with('0') && text.len() - text.find('.').map_or(text.len(), |dot| dot + 1) > 2 {
        text.pop();
    }
    text
}

/// Rewrite `program` into a Linear Advance tower and return it.
pub fn execute(mut program: GcodeProgram, parameters: &LinearAdvanceParameters) -> GcodeProgram {
    post_process(&mut program, parameters);
    program
}

/// Rewrite `program` in place into a Linear Advance tower.
///
/// The header block gets one comment line per setting. Then, walking the layers:
///
/// * the first layer of each section gets `M900 K<value>` (and `M117 K <value>` with LCD
///   messages enabled) two lines after its layer marker, the value growing by
///   `kfactor_change` each section starting at `start_kfactor`;
/// * every `M900` the slicer put in a tower layer is commented out, including ones in the
///   first layer of a section;
/// * layers below the base and non-layer blocks are left alone.
///
/// Inserted lines end the way the layer marker does (`\r` kept for CRLF files).
///
/// There's no protection against processing the same program twice: a second pass adds a
/// second header, comments out the first pass's setters before adding its own, and puts a
/// second `;` on neutralized lines.
pub fn post_process(program: &mut GcodeProgram, parameters: &LinearAdvanceParameters) -> SectionReport {
    let geometry = parameters.geometry;

    debug!("Beginning Linear Advance Tower post-processing script version {}", SCRIPT_VERSION);
    debug!("Base height = {} mm", geometry.base_height);
    debug!("Section height = {} mm", geometry.section_height);
    debug!("Initial printed layer height = {} mm", geometry.initial_layer_height);
    debug!("Printed layer height = {} mm", geometry.layer_height);
    debug!("Starting K-factor = {}", parameters.start_kfactor);
    debug!("K-factor change = {}", parameters.kfactor_change);
    debug!("Enable LCD messages = {}", parameters.enable_lcd_messages);
    debug!("Advanced Gcode comments = {}", parameters.enable_advanced_gcode_comments);

    document_settings(program, parameters);

    let matcher = KFactorLineMatcher::new();
    let mut report = SectionReport::default();

    let mut state = SectionState::new(parameters);

    let comments = CommentPolicy::from(parameters.enable_advanced_gcode_comments);
    for visit in enumerate_layers(program, geometry, comments) {
        match visit.role {
            LayerRole::Base => {}
            LayerRole::SectionStart(section) => {
                let current_kfactor = state.enter(section, parameters.kfactor_change);
                let kfactor = format_kfactor(current_kfactor);
                debug!(section, layer = visit.layer_index, "Setting K-factor to {}", kfactor);

                // Before inserting, so the new setter isn't caught.
                report.neutralized_lines += neutralize(&matcher, visit.comments, visit.lines);

                let at = visit.insertion_index();
                let eol = line_ending(&visit.lines[visit.marker_index]);
                let setter = visit.comments.annotate(
                    &format!("M900 K{}{}", kfactor, eol),
                    format_args!("setting K-factor to {}", kfactor),
                );
                visit.lines.insert(at, setter);
                if parameters.enable_lcd_messages {
                    let message = format!("K {}", kfactor);
                    let display = visit.comments.annotate(
                        &format!("M117 {}{}", message, eol),
                        format_args!("displaying \"{}\" on the LCD", message),
                    );
                    visit.lines.insert(at + 1, display);
                }
                report.kfactors.push(current_kfactor);
            }
            LayerRole::SectionInterior(section) => {
                debug_assert_eq!(state.section, Some(section));
                report.neutralized_lines += neutralize(&matcher, visit.comments, visit.lines);
            }
        }
    }

    info!(
        sections = report.sections(),
        neutralized_lines = report.neutralized_lines,
        "Completing Linear Advance Tower post-processing"
    );
    report
}

/// Comment out every K-factor change in `lines`, returning how many there were.
fn neutralize(matcher: &KFactorLineMatcher, comments: CommentPolicy, lines: &mut [String]) -> usize {
    let mut count = 0;
    for line in lines.iter_mut().filter(|line| matcher.is_kfactor_change(line)) {
        *line = comments.annotate(&format!(";{}", line), "preventing K-factor change within the tower section");
        count += 1;
    }
    count
}

fn document_settings(program: &mut GcodeProgram, parameters: &LinearAdvanceParameters) {
    let geometry = parameters.geometry;
    let settings: [(&str, String); 9] = [
        ("Linear Advance Tower post-processing script version", SCRIPT_VERSION.to_owned()),
        ("Base height =", mm(geometry.base_height)),
        ("Section height =", mm(geometry.section_height)),
        ("Initial printed layer height =", mm(geometry.initial_layer_height)),
        ("Printed layer height =", mm(geometry.layer_height)),
        ("Starting K-factor =", parameters.start_kfactor.to_string()),
        ("K-factor change =", parameters.kfactor_change.to_string()),
        ("Enable LCD messages =", parameters.enable_lcd_messages.to_string()),
        ("Advanced Gcode comments =", parameters.enable_advanced_gcode_comments.to_string()),
    ];
    for (label, value) in settings {
        program.append_to_header(format!("{} {} {}", COMMENT_PREFIX, label, value));
    }
}

fn mm(value: Mm) -> String {
    format!("{} mm", value)
}
