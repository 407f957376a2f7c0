// Copyright 2025 eraflo
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Line classification for the preprocessor.

/// The file named by an `#include`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum IncludeTarget<'a> {
    /// `#include "name"`; the name may also be a define token.
    Quoted(&'a str),
    /// `#include <name>`.
    Angled(&'a str),
}

impl<'a> IncludeTarget<'a> {
    pub(crate) fn name(self) -> &'a str {
        match self {
            IncludeTarget::Quoted(n) | IncludeTarget::Angled(n) => n,
        }
    }
}

/// What a source line means to the preprocessor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Line<'a> {
    /// `-- Tag` at column 0.
    Separator(&'a str),
    Include(IncludeTarget<'a>),
    Import(&'a str),
    CodeFrag(&'a str),
    /// `#version` or `#extension`; moved to the prepend block.
    Hoisted,
    /// `#if`, `#ifdef`, `#ifndef`.
    IfOpen,
    EndIf,
    Define {
        name: &'a str,
        value: &'a str,
    },
    Text,
}

fn is_identifier(s: &str) -> bool {
    !s.is_empty() && s.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Everything after a closing delimiter must be blank or a line comment.
fn trailing_ok(rest: &str) -> bool {
    let rest = rest.trim();
    rest.is_empty() || rest.starts_with("//")
}

fn delimited(rest: &str, open: char, close: char) -> Option<&str> {
    let inner = rest.strip_prefix(open)?;
    let end = inner.find(close)?;
    let (name, tail) = inner.split_at(end);
    (!name.is_empty() && trailing_ok(&tail[close.len_utf8()..])).then_some(name)
}

/// Classifies one line. Errors carry the reason shown in diagnostics.
pub(crate) fn classify(line: &str) -> Result<Line<'_>, &'static str> {
    if let Some(tag) = line.strip_prefix("-- ") {
        let tag = tag.trim();
        return if is_identifier(tag) {
            Ok(Line::Separator(tag))
        } else {
            Err("malformed stage separator, expected `-- <StageName>`")
        };
    }

    let Some(after_hash) = line.trim_start().strip_prefix('#') else {
        return Ok(Line::Text);
    };
    let after_hash = after_hash.trim_start();
    let keyword_len = after_hash
        .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
        .unwrap_or(after_hash.len());
    let (keyword, rest) = after_hash.split_at(keyword_len);
    let rest = rest.trim();

    match keyword {
        "include" => delimited(rest, '"', '"')
            .map(|n| Line::Include(IncludeTarget::Quoted(n)))
            .or_else(|| delimited(rest, '<', '>').map(|n| Line::Include(IncludeTarget::Angled(n))))
            .ok_or("malformed #include, expected \"file\" or <file>"),
        "import" => {
            let name = rest.split("//").next().unwrap_or("").trim();
            let valid = !name.is_empty()
                && name
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.');
            if valid {
                Ok(Line::Import(name))
            } else {
                Err("malformed #import, expected Module.Stage or .Stage")
            }
        }
        "codefrag" => {
            let name = rest.split("//").next().unwrap_or("").trim();
            if is_identifier(name) {
                Ok(Line::CodeFrag(name))
            } else {
                Err("malformed #codefrag, expected a define name")
            }
        }
        "version" | "extension" => Ok(Line::Hoisted),
        "if" | "ifdef" | "ifndef" => Ok(Line::IfOpen),
        "endif" => Ok(Line::EndIf),
        "define" => {
            let name_len = rest
                .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
                .unwrap_or(rest.len());
            let (name, value) = rest.split_at(name_len);
            Ok(Line::Define {
                name,
                value: value.trim(),
            })
        }
        _ => Ok(Line::Text),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn separators_need_a_tag_at_column_zero() {
        assert_eq!(classify("-- Fragment"), Ok(Line::Separator("Fragment")));
        assert_eq!(classify("-- FragmentBlitMS  "), Ok(Line::Separator("FragmentBlitMS")));
        assert!(classify("-- ").is_err());
        assert!(classify("-- Two Words").is_err());
        assert_eq!(classify("  -- Fragment"), Ok(Line::Text));
        assert_eq!(classify("--i;"), Ok(Line::Text));
    }

    #[test]
    fn include_forms() {
        assert_eq!(
            classify("#include \"B.glsl\""),
            Ok(Line::Include(IncludeTarget::Quoted("B.glsl")))
        );
        assert_eq!(
            classify("  #  include <Common.glsl> // shared"),
            Ok(Line::Include(IncludeTarget::Angled("Common.glsl")))
        );
        assert!(classify("#include B.glsl").is_err());
        assert!(classify("#include \"B.glsl").is_err());
        assert!(classify("#include \"\"").is_err());
    }

    #[test]
    fn imports_and_fragments() {
        assert_eq!(classify("#import Blur.Fragment"), Ok(Line::Import("Blur.Fragment")));
        assert_eq!(classify("#import .Vertex"), Ok(Line::Import(".Vertex")));
        assert!(classify("#import").is_err());
        assert_eq!(classify("#codefrag LIGHTING"), Ok(Line::CodeFrag("LIGHTING")));
        assert!(classify("#codefrag a-b").is_err());
    }

    #[test]
    fn hoisted_conditional_and_define_lines() {
        assert_eq!(classify("#version 460"), Ok(Line::Hoisted));
        assert_eq!(classify("#extension GL_EXT_ray_query : require"), Ok(Line::Hoisted));
        assert_eq!(classify("#ifdef FOO"), Ok(Line::IfOpen));
        assert_eq!(classify("#endif // FOO"), Ok(Line::EndIf));
        assert_eq!(classify("#else"), Ok(Line::Text));
        assert_eq!(
            classify("#define LIGHT_FILE \"Lights.glsl\""),
            Ok(Line::Define {
                name: "LIGHT_FILE",
                value: "\"Lights.glsl\""
            })
        );
    }
}
