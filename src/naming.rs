//! Filename grammars for archive files and the pages embedded within them
//! (spec.md §6).
//!
//! Archive: `[provider(-scanlator)?][lang] title - num(.decimal)? (name)?.ext`
//! Page:    `[provider][lang] title - num - pNNN.ext`

const FORBIDDEN: &[char] = &['<', '>', ':', '"', '/', '\\', '|', '?', '*'];

/// Strip characters that are unsafe in filenames and collapse whitespace runs
/// into a single space, trimming the result.
pub fn sanitize(input: &str) -> String {
    let stripped: String = input.chars().filter(|c| !FORBIDDEN.contains(c)).collect();
    let collapsed = stripped.split_whitespace().collect::<Vec<_>>().join(" ");
    collapsed.trim().to_string()
}

/// Zero-padding width for chapter numbers within a provider, derived from the
/// floor of the provider's highest known chapter number.
pub fn padding_width(max_chapter_in_provider: f64) -> usize {
    let floor = max_chapter_in_provider.floor().max(0.0) as u64;
    floor.to_string().len()
}

fn format_number(number: f64, width: usize) -> String {
    let whole = number.trunc();
    let fraction = number - whole;
    let whole_str = format!("{:0width$}", whole as i64, width = width);
    if fraction.abs() > f64::EPSILON {
        let frac_str = format!("{:.1}", fraction.abs());
        let decimal_digits = frac_str.trim_start_matches("0.");
        format!("{whole_str}.{decimal_digits}")
    } else {
        whole_str
    }
}

/// Build the archive filename for one chapter (spec.md §6 Archive grammar).
pub fn archive_filename(
    provider: &str,
    scanlator: Option<&str>,
    language: &str,
    title: &str,
    chapter_number: Option<f64>,
    chapter_name: &str,
    max_chapter_in_provider: f64,
    ext: &str,
) -> String {
    let provider_part = match scanlator {
        Some(s) if !s.is_empty() => format!("{}-{}", sanitize(provider), sanitize(s)),
        _ => sanitize(provider),
    };

    let width = padding_width(max_chapter_in_provider);
    let number_part = chapter_number
        .map(|n| format_number(n, width))
        .unwrap_or_else(|| "0".repeat(width.max(1)));

    let name_part = sanitize(chapter_name);
    let name_suffix = if name_part.is_empty() {
        String::new()
    } else {
        format!(" ({name_part})")
    };

    format!(
        "[{}][{}] {} - {}{}{}",
        provider_part,
        sanitize(language),
        sanitize(title),
        number_part,
        name_suffix,
        ext
    )
}

/// Build the in-archive page filename (spec.md §6 Page grammar).
pub fn page_filename(
    provider: &str,
    language: &str,
    title: &str,
    chapter_number: Option<f64>,
    page_index: u32,
    total_hint: Option<u32>,
    detected_ext: &str,
) -> String {
    let number_str = chapter_number
        .map(|n| {
            if n.fract().abs() > f64::EPSILON {
                format!("{n}")
            } else {
                format!("{}", n as i64)
            }
        })
        .unwrap_or_default();

    let page_width = total_hint
        .map(|t| t.max(1).to_string().len())
        .unwrap_or(3)
        .max(2);

    format!(
        "[{}][{}] {} - {} - p{:0width$}{}",
        sanitize(provider),
        sanitize(language),
        sanitize(title),
        number_str,
        page_index,
        detected_ext,
        width = page_width
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_strips_forbidden_characters_and_collapses_whitespace() {
        assert_eq!(sanitize("One:  Piece?*"), "One Piece");
        assert_eq!(sanitize("a/b\\c"), "abc");
    }

    #[test]
    fn padding_width_derives_from_floor_of_max_chapter() {
        assert_eq!(padding_width(9.5), 1);
        assert_eq!(padding_width(12.0), 2);
        assert_eq!(padding_width(105.0), 3);
    }

    #[test]
    fn archive_filename_includes_scanlator_when_present() {
        let name = archive_filename(
            "MangaPlus",
            Some("Group"),
            "en",
            "One Piece",
            Some(12.5),
            "",
            105.0,
            ".cbz",
        );
        assert_eq!(name, "[MangaPlus-Group][en] One Piece - 012.5.cbz");
    }

    #[test]
    fn archive_filename_omits_scanlator_segment_when_absent() {
        let name = archive_filename(
            "MangaPlus", None, "en", "One Piece", Some(5.0), "Title", 9.0, ".cbz",
        );
        assert_eq!(name, "[MangaPlus][en] One Piece - 5 (Title).cbz");
    }

    #[test]
    fn page_filename_zero_pads_by_total_hint() {
        let name = page_filename("MangaPlus", "en", "One Piece", Some(5.0), 3, Some(20), ".jpg");
        assert_eq!(name, "[MangaPlus][en] One Piece - 5 - p03.jpg");
    }
}
