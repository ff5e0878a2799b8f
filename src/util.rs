//! Small utility helpers used across modules.

/// Lenient canonical form for cheap answer equality.
///
/// Lowercases, drops apostrophes (straight and typographic), replaces every
/// non-alphanumeric character with a space and collapses runs of whitespace.
/// Two strings that differ only by case, punctuation or spacing normalize to
/// the same value, which lets the validator accept them without a network
/// round trip.
pub fn normalize_lenient(s: &str) -> String {
  let mut out = String::with_capacity(s.len());
  for ch in s.chars() {
    if ch == '\'' || ch == '\u{2019}' {
      continue;
    }
    if ch.is_alphanumeric() {
      for lower in ch.to_lowercase() {
        out.push(lower);
      }
    } else {
      out.push(' ');
    }
  }
  out.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Very small and safe string templating.
/// Replaces occurrences of `{key}` in the template with provided values.
/// This is intentionally simple (no nested/conditional logic).
pub fn fill_template(tpl: &str, pairs: &[(&str, &str)]) -> String {
  let mut out = tpl.to_string();
  for (k, v) in pairs {
    let needle = format!("{{{}}}", k);
    out = out.replace(&needle, v);
  }
  out
}

/// Log-safe truncation for large strings.
/// Avoids spamming logs with huge request/response payloads.
pub fn trunc_for_log(s: &str, max: usize) -> String {
  if s.len() <= max {
    return s.to_string();
  }
  let cut = s
    .char_indices()
    .map(|(i, _)| i)
    .take_while(|i| *i <= max)
    .last()
    .unwrap_or(0);
  format!("{}… ({} bytes total)", &s[..cut], s.len())
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn normalize_ignores_case_punctuation_whitespace() {
    assert_eq!(normalize_lenient("I'm  fine, thanks!"), "im fine thanks");
    assert_eq!(normalize_lenient("  I’M FINE   THANKS "), "im fine thanks");
    assert_eq!(normalize_lenient("Hello, world..."), normalize_lenient("hello world"));
  }

  #[test]
  fn normalize_keeps_digits_and_letters() {
    assert_eq!(normalize_lenient("Room 12-B"), "room 12 b");
    assert_eq!(normalize_lenient(""), "");
    assert_eq!(normalize_lenient("?!.,"), "");
  }

  #[test]
  fn fill_template_replaces_all_pairs() {
    let t = fill_template("a={a}, b={b}, a again={a}", &[("a", "1"), ("b", "2")]);
    assert_eq!(t, "a=1, b=2, a again=1");
  }
}
