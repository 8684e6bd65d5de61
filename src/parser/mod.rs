pub mod frontmatter;

pub use frontmatter::{normalize_content, parse_document, split_frontmatter, ParsedDocument, SkillFrontmatter};
