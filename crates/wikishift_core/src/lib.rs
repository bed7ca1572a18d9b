pub mod backlinks;
pub mod categories;
pub mod cattree;
pub mod client;
pub mod config;
pub mod editor;
pub mod guidelines;
pub mod links;
pub mod logging;
pub mod moves;
pub mod page;
pub mod runtime;
pub mod site;
pub mod templates;
pub mod wikitext;

#[cfg(test)]
mod test_support;
