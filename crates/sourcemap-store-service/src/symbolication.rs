//! Translation of minified stack frames to their original source positions.

use sourcemap::DecodedMap;

use crate::types::StackFrame;

#[derive(Debug, thiserror::Error)]
pub enum SymbolicationError {
    #[error("malformed source map")]
    MalformedSourceMap(#[from] sourcemap::Error),
}

/// A position in an original source file.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OriginalPosition {
    pub file: String,
    /// 1-based line number.
    pub line: u32,
    /// 0-based column number.
    pub column: u32,
}

/// A parsed source map, ready for position lookups.
///
/// Index source maps are flattened, so that all lookups go through one sorted token list.
pub struct SourceMapIndex {
    map: DecodedMap,
}

impl SourceMapIndex {
    pub fn parse(bytes: &[u8]) -> Result<Self, SymbolicationError> {
        let map = match sourcemap::decode_slice(bytes)? {
            DecodedMap::Index(index) => DecodedMap::Regular(index.flatten()?),
            map => map,
        };
        Ok(Self { map })
    }

    /// Looks up the original position of a generated position.
    ///
    /// `line` is 1-based and `column` is 0-based, the convention of JavaScript engines. The
    /// mapping that starts at or closest before `column` on the same generated line applies.
    /// Returns `None` if the line has no such mapping, or if the mapping has no source.
    pub fn original_position(&self, line: u32, column: u32) -> Option<OriginalPosition> {
        let dst_line = line.checked_sub(1)?;
        let token = self.map.lookup_token(dst_line, column)?;
        if token.get_dst_line() != dst_line {
            return None;
        }

        Some(OriginalPosition {
            file: token.get_source()?.to_owned(),
            line: token.get_src_line() + 1,
            column: token.get_src_col(),
        })
    }
}

impl std::fmt::Debug for SourceMapIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceMapIndex").finish_non_exhaustive()
    }
}

/// Translates a single frame.
///
/// Frames without a location are returned unchanged. For all others, the location is replaced
/// with the original one, or cleared if the source map does not cover it. The method name is
/// always kept.
pub fn symbolicate_frame(index: &SourceMapIndex, frame: &StackFrame) -> StackFrame {
    let (Some(line), Some(column)) = (frame.line, frame.column) else {
        return frame.clone();
    };

    let position = index.original_position(line, column);
    StackFrame {
        method_name: frame.method_name.clone(),
        line: position.as_ref().map(|p| p.line),
        column: position.as_ref().map(|p| p.column),
        file: position.map(|p| p.file),
    }
}

/// Translates all frames with the given source map.
///
/// The source map is parsed once for the whole batch and released when this returns. The
/// result has the same length and order as `frames`.
pub fn symbolicate_frames(
    frames: &[StackFrame],
    sourcemap: &[u8],
) -> Result<Vec<StackFrame>, SymbolicationError> {
    let index = SourceMapIndex::parse(sourcemap)?;
    Ok(frames
        .iter()
        .map(|frame| symbolicate_frame(&index, frame))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    use sourcemap_store_test::read_fixture;

    fn fixture_index() -> SourceMapIndex {
        let bytes = read_fixture("sourcemaps/index.android.bundle.map");
        SourceMapIndex::parse(&bytes).unwrap()
    }

    #[test]
    fn test_original_position() {
        let index = fixture_index();

        assert_eq!(
            index.original_position(364, 619),
            Some(OriginalPosition {
                file: "testsm-miniapp/App.js".into(),
                line: 25,
                column: 65,
            })
        );
        // exact segment start
        assert_eq!(index.original_position(364, 600).unwrap().line, 25);
        // the next segment takes over
        assert_eq!(index.original_position(364, 700).unwrap().line, 30);
    }

    #[test]
    fn test_original_position_uncovered() {
        let index = fixture_index();

        // before the first mapping of the line
        assert_eq!(index.original_position(364, 599), None);
        // a line without any mapping does not fall back to previous lines
        assert_eq!(index.original_position(300, 10), None);
        // beyond the end of the mappings
        assert_eq!(index.original_position(1000, 0), None);
        // a mapping without a source
        assert_eq!(index.original_position(10, 5), None);
        // lines are 1-based
        assert_eq!(index.original_position(0, 0), None);
    }

    #[test]
    fn test_symbolicate_frames() {
        let frames = vec![
            StackFrame::new("onPress", Some(364), Some(619)),
            StackFrame::new("touchableHandlePress", Some(203), Some(2130)),
            StackFrame::new("value", None, None),
            StackFrame::new("touchableHandlePress", Some(195), Some(9628)),
            StackFrame::new("gone", Some(300), Some(1)),
        ];
        let sourcemap = read_fixture("sourcemaps/index.android.bundle.map");

        let symbolicated = symbolicate_frames(&frames, &sourcemap).unwrap();
        assert_eq!(
            symbolicated,
            vec![
                StackFrame {
                    method_name: "onPress".into(),
                    line: Some(25),
                    column: Some(65),
                    file: Some("testsm-miniapp/App.js".into()),
                },
                StackFrame {
                    method_name: "touchableHandlePress".into(),
                    line: Some(213),
                    column: Some(45),
                    file: Some(
                        "react-native/Libraries/Components/Touchable/TouchableNativeFeedback.android.js"
                            .into()
                    ),
                },
                StackFrame::new("value", None, None),
                StackFrame {
                    method_name: "touchableHandlePress".into(),
                    line: Some(878),
                    column: Some(34),
                    file: Some("react-native/Libraries/Components/Touchable/Touchable.js".into()),
                },
                StackFrame::new("gone", None, None),
            ]
        );
    }

    #[test]
    fn test_frame_without_location_is_unchanged() {
        let index = fixture_index();
        let frame = StackFrame::new("value", None, Some(12));
        assert_eq!(symbolicate_frame(&index, &frame), frame);
    }

    #[test]
    fn test_line_zero_clears_location() {
        let index = fixture_index();
        let frame = StackFrame::new("value", Some(0), Some(0));
        assert_eq!(
            symbolicate_frame(&index, &frame),
            StackFrame::new("value", None, None)
        );
    }

    #[test]
    fn test_malformed_sourcemap() {
        let frames = vec![StackFrame::new("value", Some(1), Some(1))];
        let err = symbolicate_frames(&frames, b"<html>not a source map</html>").unwrap_err();
        assert!(matches!(err, SymbolicationError::MalformedSourceMap(_)));
    }

    #[test]
    fn test_empty_batch() {
        let sourcemap = read_fixture("sourcemaps/index.android.bundle.map");
        assert_eq!(symbolicate_frames(&[], &sourcemap).unwrap(), vec![]);
    }
}
