use regex::Regex;
use std::fs;
use std::io::{self, Write};
use std::iter::Enumerate;
use std::path::{Path, PathBuf};
use std::slice::IterMut;
use tracing::{debug, info, warn};

pub mod config;
pub mod controller;
pub mod error;
pub mod la_tower;
pub mod model;
pub mod preflight;
pub mod presets;

pub use config::PostProcessConfig;
pub use error::{TowerError, TowerResult};
pub use la_tower::{LinearAdvanceParameters, SectionReport};

// Heights are in millimetres.
pub type Mm = f64;
pub type KFactor = f64;

/// Prefix of every comment this crate writes into G-code.
pub const COMMENT_PREFIX: &str = ";AutoTowersGenerator:";

// Heights accumulate one layer at a time, so 5 x 0.2 can land a hair below 1.0. Anything within
// this distance of a section boundary counts as being on it.
const HEIGHT_EPSILON: Mm = 1e-6;

/// Whether lines written by a pass carry a human-readable note.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum CommentPolicy {
    Plain,
    #[default]
    Annotated,
}

impl From<bool> for CommentPolicy {
    fn from(enable_advanced_gcode_comments: bool) -> Self {
        if enable_advanced_gcode_comments {
            CommentPolicy::Annotated
        } else {
            CommentPolicy::Plain
        }
    }
}

impl CommentPolicy {
    /// `line`, followed by ` ;AutoTowersGenerator: note` when annotated. A trailing `\r` stays
    /// at the end.
    pub fn annotate(self, line: &str, note: impl std::fmt::Display) -> String {
        match self {
            CommentPolicy::Plain => line.to_owned(),
            CommentPolicy::Annotated => {
                let eol = line_ending(line);
                let body = &line[..line.len() - eol.len()];
                format!("{} {} {}{}", body, COMMENT_PREFIX, note, eol)
            }
        }
    }
}

/// `"\r"` for a line split out of CRLF text, `""` otherwise.
pub fn line_ending(line: &str) -> &'static str {
    if line.ends_with('\r') {
        "\r"
    } else {
        ""
    }
}

/// The layer markers and per-layer height tags slicers embed as comments.
///
/// Cura writes `;LAYER:<n>` (negative for raft layers); PrusaSlicer and its forks write
/// `;LAYER_CHANGE` followed by `;Z:` and `;HEIGHT:` tags.
#[derive(Debug, Clone)]
pub struct LayerMarkers {
    layer: Regex,
    height: Regex,
}

impl Default for LayerMarkers {
    fn default() -> Self {
        Self::new()
    }
}

impl LayerMarkers {
    pub fn new() -> LayerMarkers {
        LayerMarkers {
            layer: Regex::new(r"^;(?:LAYER:(?<number>-?[0-9]+)|LAYER_CHANGE)\s*$").unwrap(),
            height: Regex::new(r"^;HEIGHT:(?<height>[^;]*)$").unwrap(),
        }
    }

    pub fn is_layer_marker(&self, line: &str) -> bool {
        self.layer.is_match(line)
    }

    /// Index of the first layer marker in `lines`, if this block is a layer at all.
    pub fn leading_marker(&self, lines: &[String]) -> Option<usize> {
        lines.iter().position(|line| self.is_layer_marker(line))
    }

    /// The explicit `;HEIGHT:` tag of a layer. `Some(Err(text))` when the tag is present but
    /// isn't a usable height.
    pub fn explicit_height<'a>(&self, lines: &'a [String]) -> Option<Result<Mm, &'a str>> {
        let captures = lines.iter().find_map(|line| self.height.captures(line))?;
        let text = captures.name("height").map_or("", |m| m.as_str()).trim();
        Some(text.parse::<Mm>().ok().filter(|h| h.is_finite() && *h >= 0.0).ok_or(text))
    }
}

/// A whole G-code program as an ordered list of blocks, each an ordered list of lines.
///
/// Blocks are either layers (they contain a layer marker) or the non-layer text around them:
/// the header, start G-code and end G-code. Joining every line of every block with `\n`
/// reproduces the original text.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct GcodeProgram {
    blocks: Vec<Vec<String>>,
}

impl GcodeProgram {
    pub fn new() -> GcodeProgram {
        GcodeProgram::default()
    }

    /// From a host's list of chunks (typically one per layer, plus header and start/end
    /// chunks). Each chunk becomes one block, split on `\n`.
    pub fn from_blocks<I, S>(chunks: I) -> GcodeProgram
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let blocks = chunks
            .into_iter()
            .map(|chunk| chunk.as_ref().split('\n').map(str::to_owned).collect())
            .collect();
        GcodeProgram { blocks }
    }

    /// From flat G-code text, starting a new block at every layer marker.
    pub fn from_text(text: &str) -> GcodeProgram {
        GcodeProgram::from_lines(text.split('\n').map(str::to_owned))
    }

    /// From a sequence of lines without terminators, starting a new block at every layer
    /// marker. Lines before the first marker form the header block.
    pub fn from_lines<I>(lines: I) -> GcodeProgram
    where
        I: IntoIterator<Item = String>,
    {
        let markers = LayerMarkers::new();
        let mut blocks: Vec<Vec<String>> = vec![];
        let mut current: Vec<String> = vec![];
        for line in lines {
            if markers.is_layer_marker(&line) && !current.is_empty() {
                blocks.push(std::mem::take(&mut current));
            }
            current.push(line);
        }
        if !current.is_empty() {
            blocks.push(current);
        }
        GcodeProgram { blocks }
    }

    pub fn blocks(&self) -> &[Vec<String>] {
        &self.blocks
    }

    pub fn blocks_mut(&mut self) -> &mut Vec<Vec<String>> {
        &mut self.blocks
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Number of blocks that are layers.
    pub fn layer_count(&self) -> usize {
        let markers = LayerMarkers::new();
        self.blocks
            .iter()
            .filter(|block| markers.leading_marker(block).is_some())
            .count()
    }

    /// Every line of the program, in order.
    pub fn lines(&self) -> impl Iterator<Item = &str> {
        self.blocks.iter().flatten().map(String::as_str)
    }

    /// Append a line to the first block. When the block text ended with a newline (its last
    /// line is empty), the line goes before that empty line so the block still ends with one.
    /// Follows the header's CRLF line endings. Does nothing on an empty program.
    pub fn append_to_header(&mut self, mut line: String) {
        let Some(header) = self.blocks.first_mut() else {
            warn!("No header block to document the tower settings in");
            return;
        };
        let eol = header.first().map_or("", |first| line_ending(first));
        if line_ending(&line).is_empty() {
            line.push_str(eol);
        }
        if header.last().is_some_and(|last| last.is_empty()) {
            let at = header.len() - 1;
            header.insert(at, line);
        } else {
            header.push(line);
        }
    }

    /// Back to one string per block, the inverse of [`GcodeProgram::from_blocks`].
    pub fn into_chunks(self) -> Vec<String> {
        self.blocks.into_iter().map(|block| block.join("\n")).collect()
    }

    /// Back to flat text, the inverse of [`GcodeProgram::from_text`].
    pub fn to_text(&self) -> String {
        self.lines().collect::<Vec<_>>().join("\n")
    }
}

/// Where a tower sits on the print bed and how tall its pieces are, in millimetres.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TowerGeometry {
    /// Height of the plain base below the first section.
    pub base_height: Mm,
    /// Height of each section. Must be positive to get more than one section.
    pub section_height: Mm,
    pub initial_layer_height: Mm,
    pub layer_height: Mm,
}

impl Default for TowerGeometry {
    fn default() -> Self {
        TowerGeometry {
            base_height: 0.0,
            section_height: 8.0,
            initial_layer_height: 0.2,
            layer_height: 0.2,
        }
    }
}

/// How a layer relates to the tower sections.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayerRole {
    /// Below `base_height`; never part of a section.
    Base,
    /// First layer of the given section.
    SectionStart(usize),
    /// Any later layer of the given section.
    SectionInterior(usize),
}

/// One layer handed out by [`LayerEnumerator`], with its lines open for rewriting.
#[derive(Debug)]
pub struct LayerVisit<'a> {
    /// Position among the layers of the program (non-layer blocks aren't counted).
    pub layer_index: usize,
    /// Position among all blocks of the program.
    pub block_index: usize,
    /// Printed height before this layer.
    pub bottom: Mm,
    /// Printed height after this layer.
    pub top: Mm,
    pub role: LayerRole,
    /// Index of the layer's leading marker line within `lines`.
    pub marker_index: usize,
    pub comments: CommentPolicy,
    pub lines: &'a mut Vec<String>,
}

impl LayerVisit<'_> {
    pub fn start_of_new_section(&self) -> bool {
        matches!(self.role, LayerRole::SectionStart(_))
    }

    /// Where a section's configuration lines go: two lines past the leading marker, clamped to
    /// the end of the block.
    pub fn insertion_index(&self) -> usize {
        (self.marker_index + la_tower::SETTING_LINE_OFFSET).min(self.lines.len())
    }
}

/// Lazy, single-pass walk over the layers of a program. See [`enumerate_layers`].
pub struct LayerEnumerator<'a> {
    blocks: Enumerate<IterMut<'a, Vec<String>>>,
    geometry: TowerGeometry,
    comments: CommentPolicy,
    markers: LayerMarkers,
    layer_index: usize,
    printed_height: Mm,
    last_section: Option<usize>,
}

/// Walk the layers of `program` in order, tracking printed height and tower sections.
///
/// Layer thickness comes from the layer's `;HEIGHT:` tag when it has one, otherwise from
/// `initial_layer_height` for the first layer and `layer_height` after that. A layer belongs
/// to section `floor((bottom - base_height) / section_height)` where `bottom` is the printed
/// height before it. The first layer of each section is reported as
/// [`LayerRole::SectionStart`], exactly once per section.
///
/// Non-layer blocks are skipped. The enumerator can't be rewound; walk again with a fresh
/// call.
pub fn enumerate_layers(
    program: &mut GcodeProgram,
    geometry: TowerGeometry,
    comments: CommentPolicy,
) -> LayerEnumerator<'_> {
    if !(geometry.section_height > 0.0 && geometry.section_height.is_finite()) {
        warn!(
            section_height = geometry.section_height,
            "Section height is not positive, the whole tower is one section"
        );
    }
    LayerEnumerator {
        blocks: program.blocks.iter_mut().enumerate(),
        geometry,
        comments,
        markers: LayerMarkers::new(),
        layer_index: 0,
        printed_height: 0.0,
        last_section: None,
    }
}

impl LayerEnumerator<'_> {
    fn thickness(&self, lines: &[String]) -> Mm {
        let uniform = if self.layer_index == 0 {
            self.geometry.initial_layer_height
        } else {
            self.geometry.layer_height
        };
        match self.markers.explicit_height(lines) {
            Some(Ok(height)) => height,
            Some(Err(text)) => {
                warn!(layer = self.layer_index, tag = text, "Unreadable layer height tag, assuming {} mm", uniform);
                uniform
            }
            None => uniform,
        }
    }

    fn section_at(&self, bottom: Mm) -> Option<usize> {
        let above_base = bottom - self.geometry.base_height;
        if above_base < -HEIGHT_EPSILON {
            return None;
        }
        let section_height = self.geometry.section_height;
        if !(section_height > 0.0 && section_height.is_finite()) {
            return Some(0);
        }
        Some(((above_base + HEIGHT_EPSILON) / section_height).floor().max(0.0) as usize)
    }

    fn role_at(&mut self, bottom: Mm) -> LayerRole {
        let Some(section) = self.section_at(bottom) else {
            return LayerRole::Base;
        };
        match self.last_section {
            Some(last) if section <= last => LayerRole::SectionInterior(last),
            _ => {
                self.last_section = Some(section);
                LayerRole::SectionStart(section)
            }
        }
    }
}

impl<'a> Iterator for LayerEnumerator<'a> {
    type Item = LayerVisit<'a>;

    fn next(&mut self) -> Option<LayerVisit<'a>> {
        loop {
            let (block_index, lines) = self.blocks.next()?;
            let Some(marker_index) = self.markers.leading_marker(lines) else {
                continue;
            };

            let bottom = self.printed_height;
            let top = bottom + self.thickness(lines);
            let role = self.role_at(bottom);
            if let LayerRole::SectionStart(section) = role {
                debug!(layer = self.layer_index, section, bottom, "Start of tower section");
            }

            let visit = LayerVisit {
                layer_index: self.layer_index,
                block_index,
                bottom,
                top,
                role,
                marker_index,
                comments: self.comments,
                lines,
            };
            self.layer_index += 1;
            self.printed_height = top;
            return Some(visit);
        }
    }
}

/// Post-process `input_filename` into `output_filename` with the tower described by `config`.
///
/// The output can be the same file as the input; the new text goes to `<output>.tmp` first
/// and only replaces the output once it has been written completely.
pub fn process_files(
    input_filename: impl AsRef<Path>,
    output_filename: impl AsRef<Path>,
    config: &PostProcessConfig,
) -> TowerResult<SectionReport> {
    let input_filename = input_filename.as_ref();
    let output_filename = output_filename.as_ref();
    let mut tmp_output_filename = output_filename.as_os_str().to_owned();
    tmp_output_filename.push(".tmp");
    let tmp_output_filename = PathBuf::from(tmp_output_filename);

    // Whole text rather than `BufRead::lines`, which would drop `\r` and the missing final newline.
    let text = fs::read_to_string(input_filename).map_err(|e| TowerError::io(input_filename, e))?;
    let mut program = GcodeProgram::from_text(&text);
    info!(
        blocks = program.blocks().len(),
        layers = program.layer_count(),
        "Read G-code from {}",
        input_filename.display()
    );

    let controller = config.controller()?;
    let report = controller.post_process_in_place(
        &mut program,
        config.enable_lcd_messages,
        config.enable_advanced_gcode_comments,
    )?;

    let written = write_program(&tmp_output_filename, &program)
        .and_then(|()| fs::rename(&tmp_output_filename, output_filename).map_err(|e| TowerError::io(output_filename, e)));
    if let Err(err) = written {
        if let Err(remove_err) = fs::remove_file(&tmp_output_filename) {
            debug!("Could not remove {}: {}", tmp_output_filename.display(), remove_err);
        }
        return Err(err);
    }
    Ok(report)
}

/// Lines joined with `\n`, so the output ends exactly the way the input did.
fn write_program(filename: &Path, program: &GcodeProgram) -> TowerResult<()> {
    let file = fs::File::create(filename).map_err(|e| TowerError::io(filename, e))?;
    let mut buf_writer = io::BufWriter::with_capacity(8 * 1024, file);
    for (n, line) in program.lines().enumerate() {
        if n > 0 {
            buf_writer.write_all(b"\n").map_err(|e| TowerError::io(filename, e))?;
        }
        buf_writer.write_all(line.as_bytes()).map_err(|e| TowerError::io(filename, e))?;
    }
    buf_writer.flush().map_err(|e| TowerError::io(filename, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    // A Cura-style chunk list: header, start G-code, one chunk per layer, end G-code.
    fn cura_chunks(layer_count: usize) -> Vec<String> {
        let mut chunks = vec![
            ";FLAVOR:Marlin\n;Generated with Cura_SteamEngine 5.7.0\n".to_owned(),
            ";START_GCODE\nG28\nM900 K0\n;LAYER_COUNT:10\n".to_owned(),
        ];
        for layer in 0..layer_count {
            chunks.push(format!(";LAYER:{layer}\nM107\nG0 X10 Y10\n;TYPE:WALL-OUTER\nG1 X20 Y10 E0.5\n"));
        }
        chunks.push(";END_GCODE\nM104 S0\n".to_owned());
        chunks
    }

    fn geometry(base_height: Mm, section_height: Mm, initial_layer_height: Mm, layer_height: Mm) -> TowerGeometry {
        TowerGeometry { base_height, section_height, initial_layer_height, layer_height }
    }

    fn roles(program: &mut GcodeProgram, geometry: TowerGeometry) -> Vec<LayerRole> {
        enumerate_layers(program, geometry, CommentPolicy::Plain).map(|visit| visit.role).collect()
    }

    #[test]
    fn chunks_round_trip() {
        let chunks = cura_chunks(3);
        let program = GcodeProgram::from_blocks(&chunks);
        assert_eq!(program.blocks().len(), 6);
        assert_eq!(program.layer_count(), 3);
        assert_eq!(program.into_chunks(), chunks);
    }

    #[test]
    fn text_splits_at_layer_markers() {
        let text = ";FLAVOR:Marlin\nG28\n;LAYER_CHANGE\n;Z:0.2\n;HEIGHT:0.2\nG1 X1 E1\n;LAYER_CHANGE\n;Z:0.4\n;HEIGHT:0.2\nG1 X2 E1\n";
        let program = GcodeProgram::from_text(text);
        assert_eq!(program.blocks().len(), 3);
        assert_eq!(program.blocks()[0], vec![";FLAVOR:Marlin", "G28"]);
        assert_eq!(program.blocks()[1][0], ";LAYER_CHANGE");
        assert_eq!(program.layer_count(), 2);
        assert_eq!(program.to_text(), text);
    }

    #[test]
    fn layer_count_line_is_not_a_marker() {
        let markers = LayerMarkers::new();
        assert!(markers.is_layer_marker(";LAYER:0"));
        assert!(markers.is_layer_marker(";LAYER:-2"));
        assert!(markers.is_layer_marker(";LAYER_CHANGE"));
        assert!(!markers.is_layer_marker(";LAYER_COUNT:10"));
        assert!(!markers.is_layer_marker("; LAYER:3"));
        assert!(!markers.is_layer_marker("G1 X1 ;LAYER:3"));
    }

    #[test]
    fn header_lines_go_before_trailing_newline() {
        let mut program = GcodeProgram::from_blocks(cura_chunks(1));
        program.append_to_header(";one".to_owned());
        program.append_to_header(";two".to_owned());
        let chunks = program.into_chunks();
        assert_eq!(chunks[0], ";FLAVOR:Marlin\n;Generated with Cura_SteamEngine 5.7.0\n;one\n;two\n");

        let mut program = GcodeProgram::from_text("G28");
        program.append_to_header(";one".to_owned());
        assert_eq!(program.to_text(), "G28\n;one");

        let mut empty = GcodeProgram::new();
        empty.append_to_header(";one".to_owned());
        assert!(empty.is_empty());
    }

    #[test]
    fn zero_layers_yield_nothing() {
        let mut program = GcodeProgram::new();
        assert_eq!(roles(&mut program, TowerGeometry::default()), vec![]);

        let mut program = GcodeProgram::from_text(";FLAVOR:Marlin\nG28\n");
        assert_eq!(roles(&mut program, TowerGeometry::default()), vec![]);
    }

    #[test]
    fn sections_of_uniform_layers() {
        let mut program = GcodeProgram::from_blocks(cura_chunks(10));
        let visits: Vec<(usize, usize, LayerRole)> =
            enumerate_layers(&mut program, geometry(0.0, 1.0, 0.2, 0.2), CommentPolicy::Plain)
                .map(|visit| (visit.layer_index, visit.block_index, visit.role))
                .collect();
        assert_eq!(visits.len(), 10);
        assert_eq!(visits[0], (0, 2, LayerRole::SectionStart(0)));
        for (layer, _, role) in &visits[1..5] {
            assert_eq!(*role, LayerRole::SectionInterior(0), "layer {layer}");
        }
        assert_eq!(visits[5], (5, 7, LayerRole::SectionStart(1)));
        for (layer, _, role) in &visits[6..] {
            assert_eq!(*role, LayerRole::SectionInterior(1), "layer {layer}");
        }
    }

    #[test]
    fn heights_accumulate_from_initial_layer() {
        let mut program = GcodeProgram::from_blocks(cura_chunks(3));
        let heights: Vec<(Mm, Mm)> =
            enumerate_layers(&mut program, geometry(0.0, 1.0, 0.3, 0.2), CommentPolicy::Plain)
                .map(|visit| (visit.bottom, visit.top))
                .collect();
        assert_relative_eq!(heights[0].0, 0.0);
        assert_relative_eq!(heights[0].1, 0.3);
        assert_relative_eq!(heights[1].1, 0.5);
        assert_relative_eq!(heights[2].0, 0.5);
        assert_relative_eq!(heights[2].1, 0.7);
    }

    #[test]
    fn layers_below_base_never_start_a_section() {
        let mut program = GcodeProgram::from_blocks(cura_chunks(8));
        let roles = roles(&mut program, geometry(0.6, 1.0, 0.2, 0.2));
        assert_eq!(&roles[..3], &[LayerRole::Base, LayerRole::Base, LayerRole::Base]);
        assert_eq!(roles[3], LayerRole::SectionStart(0));
        assert!(roles[4..].iter().all(|role| *role == LayerRole::SectionInterior(0)));
    }

    #[test]
    fn non_positive_section_height_is_one_section() {
        for section_height in [0.0, -1.0, Mm::NAN] {
            let mut program = GcodeProgram::from_blocks(cura_chunks(6));
            let roles = roles(&mut program, geometry(0.0, section_height, 0.2, 0.2));
            assert_eq!(roles[0], LayerRole::SectionStart(0));
            assert!(roles[1..].iter().all(|role| *role == LayerRole::SectionInterior(0)));
        }
    }

    #[test]
    fn tall_layer_skipping_sections_fires_once() {
        let text = ";LAYER_CHANGE\n;HEIGHT:0.2\n;LAYER_CHANGE\n;HEIGHT:2.5\n;LAYER_CHANGE\n;HEIGHT:0.2\n";
        let mut program = GcodeProgram::from_text(text);
        let roles = roles(&mut program, geometry(0.0, 1.0, 0.2, 0.2));
        // Bottoms are 0.0, 0.2 and 2.7, so the last layer jumps from section 0 to section 2.
        assert_eq!(
            roles,
            vec![LayerRole::SectionStart(0), LayerRole::SectionInterior(0), LayerRole::SectionStart(2)]
        );
    }

    #[test]
    fn explicit_height_tags_win_over_uniform_heights() {
        let text = ";LAYER_CHANGE\n;Z:0.3\n;HEIGHT:0.3\n\
                    ;LAYER_CHANGE\n;Z:0.4\n;HEIGHT:0.1\n\
                    ;LAYER_CHANGE\n;Z:0.5\n;HEIGHT:0.1\n\
                    ;LAYER_CHANGE\n;Z:0.6\n;HEIGHT:0.1\n";
        let mut program = GcodeProgram::from_text(text);
        let tops: Vec<Mm> = enumerate_layers(&mut program, geometry(0.0, 0.5, 0.2, 0.2), CommentPolicy::Plain)
            .map(|visit| visit.top)
            .collect();
        assert_eq!(tops.len(), 4);
        assert_relative_eq!(tops[0], 0.3);
        assert_relative_eq!(tops[1], 0.4);
        assert_relative_eq!(tops[3], 0.6);

        let roles = roles(&mut program, geometry(0.0, 0.5, 0.2, 0.2));
        assert_eq!(roles[3], LayerRole::SectionStart(1));
    }

    #[test]
    fn unreadable_height_tag_falls_back_to_uniform() {
        let mut program = GcodeProgram::from_text(";LAYER_CHANGE\n;HEIGHT:abc\n;LAYER_CHANGE\n;HEIGHT:-1\n");
        let tops: Vec<Mm> = enumerate_layers(&mut program, geometry(0.0, 1.0, 0.3, 0.2), CommentPolicy::Plain)
            .map(|visit| visit.top)
            .collect();
        assert_relative_eq!(tops[0], 0.3);
        assert_relative_eq!(tops[1], 0.5);
    }

    #[test]
    fn section_starts_match_tower_height() {
        // (layers, initial layer height, layer height, base height, section height)
        let cases = [
            (10, 0.2, 0.2, 0.0, 1.0),
            (23, 0.1, 0.1, 0.0, 0.5),
            (13, 0.2, 0.2, 0.6, 1.0),
            (11, 0.3, 0.2, 0.3, 1.0),
            (40, 0.2, 0.2, 0.0, 8.0),
            (120, 0.2, 0.2, 0.0, 1.6),
        ];
        for (layers, initial, height, base, section) in cases {
            let mut program = GcodeProgram::from_blocks(cura_chunks(layers));
            let starts = roles(&mut program, geometry(base, section, initial, height))
                .into_iter()
                .filter(|role| matches!(role, LayerRole::SectionStart(_)))
                .count();
            let total: Mm = initial + (layers - 1) as Mm * height;
            let expected = (((total - base) / section) - 1e-9).ceil().max(1.0) as usize;
            assert_eq!(starts, expected, "{layers} layers of {height} on {initial}, base {base}, sections of {section}");
        }
    }

    #[test]
    fn visit_exposes_marker_and_insertion_point() {
        let mut program = GcodeProgram::from_blocks([";TIME_ELAPSED:10\n;LAYER:0\nM107\nG1 X1 E1\n", ";LAYER:1\n"]);
        let visits: Vec<(usize, usize, bool)> =
            enumerate_layers(&mut program, TowerGeometry::default(), CommentPolicy::Plain)
                .map(|visit| (visit.marker_index, visit.insertion_index(), visit.start_of_new_section()))
                .collect();
        assert_eq!(visits, vec![(1, 3, true), (0, 2, false)]);
    }

    #[test]
    fn crlf_lines_keep_their_ending() {
        assert_eq!(line_ending("G28\r"), "\r");
        assert_eq!(line_ending("G28"), "");
        assert_eq!(
            CommentPolicy::Annotated.annotate(";M900 K0.1\r", "note"),
            ";M900 K0.1 ;AutoTowersGenerator: note\r"
        );
        assert_eq!(CommentPolicy::Plain.annotate(";M900 K0.1\r", "note"), ";M900 K0.1\r");

        let text = ";FLAVOR:Marlin\r\nG28\r\n;LAYER:0\r\nG1 X1 E1";
        let mut program = GcodeProgram::from_text(text);
        assert_eq!(program.layer_count(), 1);
        assert_eq!(program.to_text(), text);
        program.append_to_header(";one".to_owned());
        assert_eq!(program.to_text(), ";FLAVOR:Marlin\r\nG28\r\n;one\r\n;LAYER:0\r\nG1 X1 E1");
    }

    #[test]
    fn comment_policy_annotates_only_when_enabled() {
        assert_eq!(CommentPolicy::from(false).annotate("M900 K0.1", "note"), "M900 K0.1");
        assert_eq!(
            CommentPolicy::from(true).annotate("M900 K0.1", "note"),
            "M900 K0.1 ;AutoTowersGenerator: note"
        );
    }
}
