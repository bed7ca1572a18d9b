use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::{Args, CommandFactory, Parser, Subcommand, ValueEnum};
use tracing::{debug, info};
use wikishift_core::backlinks::{BacklinkRules, print_backlinks, resolve_backlinks_with_subpages};
use wikishift_core::categories::{
    LangCategory, Recategorization, TemplateAliases, default_summary, move_members,
    move_or_redirect_category_page, recategorize, remove_members,
};
use wikishift_core::cattree::{LanguageTable, ParentCategory, TreeMoveRequest, move_category_tree};
use wikishift_core::client::{ClientConfig, MediaWikiClient};
use wikishift_core::config::{ShiftConfig, credentials_from_env, load_config};
use wikishift_core::editor::{Editor, EditorOptions, TerminalPrompt};
use wikishift_core::guidelines::{CampaignOptions, run_campaign};
use wikishift_core::logging;
use wikishift_core::moves::{BacklinkPolicy, MoveRequest, MoveState, UpdateReasons, advanced_move};
use wikishift_core::runtime::{
    PathOverrides, ResolutionContext, ResolvedPaths, normalize_for_display, resolve_paths,
};
use wikishift_core::templates::{PageSource, TemplateRenameRequest, rename_template};

#[derive(Debug, Parser)]
#[command(
    name = "wikishift",
    version,
    about = "Move wiki pages and categories and rewrite everything that points at them"
)]
struct Cli {
    #[arg(long, global = true, value_name = "PATH")]
    project_root: Option<PathBuf>,
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,
    #[arg(long, global = true, value_name = "PATH", help = "Where dry runs write .wiki files")]
    output_dir: Option<PathBuf>,
    #[arg(long, global = true, help = "Print resolved runtime diagnostics")]
    diagnostics: bool,
    #[arg(short, long, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Clone)]
struct RuntimeOptions {
    project_root: Option<PathBuf>,
    config: Option<PathBuf>,
    output_dir: Option<PathBuf>,
    diagnostics: bool,
    verbose: bool,
}

impl RuntimeOptions {
    fn from_cli(cli: &Cli) -> Self {
        Self {
            project_root: cli.project_root.clone(),
            config: cli.config.clone(),
            output_dir: cli.output_dir.clone(),
            diagnostics: cli.diagnostics,
            verbose: cli.verbose,
        }
    }
}

#[derive(Debug, Subcommand)]
enum Commands {
    #[command(about = "Move a page and its subpages, then update backlinks")]
    Move(MoveArgs),
    #[command(about = "Show the classified backlinks of a page and its subpages")]
    Backlinks(BacklinksArgs),
    #[command(name = "cat-move", about = "Move every member of a category to another category")]
    CatMove(CatMoveArgs),
    #[command(name = "cat-remove", about = "Remove every member from a category")]
    CatRemove(CatRemoveArgs),
    #[command(
        name = "cat-recategorize",
        about = "Add, remove or replace a plain category link on every member of a category"
    )]
    CatRecategorize(CatRecategorizeArgs),
    #[command(
        name = "cat-tree-move",
        about = "Rename a category and all of its per-language subcategories"
    )]
    CatTreeMove(CatTreeMoveArgs),
    #[command(
        name = "template-rename",
        about = "Rename template invocations on the members of a category"
    )]
    TemplateRename(TemplateRenameArgs),
    #[command(about = "Rename `Wiktionary:About <Lang>` pages to `<Lang> entry guidelines`")]
    Guidelines(GuidelinesArgs),
}

#[derive(Debug, Args)]
struct RunArgs {
    #[arg(short, long, help = "Preview changes without writing to the wiki")]
    dry_run: bool,
    #[arg(short = 'i', long, value_name = "N", help = "Stop after N changes")]
    limit: Option<usize>,
}

#[derive(Debug, Args)]
struct MoveArgs {
    old_title: String,
    new_title: String,
    #[arg(help = "Edit summary used for the moves")]
    move_reason: String,
    #[arg(short = 's', long, help = "Do not move subpages")]
    ignore_subpages: bool,
    #[arg(long, default_value = "all", value_name = "POLICY", help = "all, redirects-only, links-only or none")]
    backlinks: BacklinkPolicy,
    #[arg(short = 'r', long, value_name = "SUMMARY")]
    redirect_reason: Option<String>,
    #[arg(short = 'l', long, value_name = "SUMMARY")]
    link_reason: Option<String>,
    #[arg(long, value_name = "LANG", help = "Language whose own category page is left alone")]
    lang: Option<String>,
    #[command(flatten)]
    run: RunArgs,
}

#[derive(Debug, Args)]
struct BacklinksArgs {
    title: String,
    #[arg(long, value_name = "LANG")]
    lang: Option<String>,
}

#[derive(Debug, Args)]
struct CategoryArgs {
    #[arg(help = "Category name without the language prefix")]
    base_name: String,
    lang_code: String,
    lang_name: String,
    #[arg(short = 't', long, help = "Topic category (Category:en:Philosophy)")]
    topic: bool,
}

impl CategoryArgs {
    fn category(&self) -> LangCategory {
        LangCategory::new(&self.base_name, &self.lang_code, &self.lang_name, self.topic)
    }
}

#[derive(Debug, Args)]
struct CatMoveArgs {
    #[command(flatten)]
    source: CategoryArgs,
    dst_base_name: String,
    #[arg(short = 'c', long, value_name = "CODE")]
    dst_lang_code: Option<String>,
    #[arg(short = 'n', long, value_name = "NAME")]
    dst_lang_name: Option<String>,
    #[arg(short = 'o', long, help = "Destination is a topic category")]
    dst_topic: bool,
    #[arg(short = 'p', long, help = "Move the category page too, or redirect it")]
    page: bool,
    #[arg(short, long)]
    summary: Option<String>,
    #[command(flatten)]
    run: RunArgs,
}

#[derive(Debug, Args)]
struct CatRemoveArgs {
    #[command(flatten)]
    category: CategoryArgs,
    #[arg(short, long)]
    summary: Option<String>,
    #[command(flatten)]
    run: RunArgs,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum RecategorizeAction {
    Add,
    Remove,
    Replace,
}

#[derive(Debug, Args)]
struct CatRecategorizeArgs {
    action: RecategorizeAction,
    #[arg(help = "Category whose members are edited; also the one removed or replaced")]
    existing: String,
    #[arg(help = "Category to add, or to replace with")]
    new: Option<String>,
    #[arg(short, long)]
    summary: Option<String>,
    #[command(flatten)]
    run: RunArgs,
}

#[derive(Debug, Args)]
struct CatTreeMoveArgs {
    src_base_name: String,
    dst_base_name: String,
    #[arg(help = "Language list, `;`-separated with a header row")]
    langs_path: PathBuf,
    #[arg(short = 't', long)]
    src_topic: bool,
    #[arg(short = 'o', long)]
    dst_topic: bool,
    #[arg(short = 'p', long, help = "Move the parent category page too")]
    page: bool,
    #[arg(short, long)]
    summary: Option<String>,
    #[command(flatten)]
    run: RunArgs,
}

#[derive(Debug, Args)]
struct TemplateRenameArgs {
    old_name: String,
    new_name: String,
    #[arg(long, value_name = "NAME", conflicts_with = "lang", required_unless_present = "lang")]
    category: Option<String>,
    #[arg(long, value_name = "LANG", help = "Scan the lemmas and non-lemma forms of a language")]
    lang: Option<String>,
    #[arg(short, long)]
    summary: Option<String>,
    #[command(flatten)]
    run: RunArgs,
}

#[derive(Debug, Args)]
struct GuidelinesArgs {
    #[arg(short = 's', long, num_args = 0.., value_name = "LANG")]
    skip: Vec<String>,
    #[command(flatten)]
    run: RunArgs,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let runtime = RuntimeOptions::from_cli(&cli);
    logging::init(runtime.verbose);

    match cli.command {
        Some(Commands::Move(args)) => run_move(&runtime, args),
        Some(Commands::Backlinks(args)) => run_backlinks(&runtime, args),
        Some(Commands::CatMove(args)) => run_cat_move(&runtime, args),
        Some(Commands::CatRemove(args)) => run_cat_remove(&runtime, args),
        Some(Commands::CatRecategorize(args)) => run_cat_recategorize(&runtime, args),
        Some(Commands::CatTreeMove(args)) => run_cat_tree_move(&runtime, args),
        Some(Commands::TemplateRename(args)) => run_template_rename(&runtime, args),
        Some(Commands::Guidelines(args)) => run_guidelines(&runtime, args),
        None => {
            let mut command = Cli::command();
            command.print_help()?;
            println!();
            Ok(())
        }
    }
}

/// Everything a command needs: resolved paths, config and a connected site.
struct Session {
    paths: ResolvedPaths,
    config: ShiftConfig,
    site: MediaWikiClient,
}

impl Session {
    fn open(runtime: &RuntimeOptions, writes: bool) -> Result<Self> {
        let paths = resolve_runtime_paths(runtime)?;
        let config = load_config(&paths.config_path)?;
        let mut site = MediaWikiClient::new(ClientConfig::from_config(&config))?;
        if writes {
            match credentials_from_env() {
                Some((user, password)) => site
                    .login(&user, &password)
                    .with_context(|| format!("failed to log in to {}", site.api_url()))?,
                None => info!("WIKI_BOT_USER/WIKI_BOT_PASS not set; editing anonymously"),
            }
        }
        if runtime.diagnostics {
            println!("[diagnostics]\n{}\napi_url={}\n", paths.diagnostics(), site.api_url());
        }
        Ok(Self {
            paths,
            config,
            site,
        })
    }

    fn rules(&self) -> Result<BacklinkRules> {
        BacklinkRules::from_config(&self.config.backlinks)
    }

    /// Interactive tools preview dry runs on screen only.
    fn interactive_editor(&self, run: &RunArgs) -> Editor<TerminalPrompt> {
        Editor::new(
            EditorOptions {
                dry_run: run.dry_run,
                dry_run_dir: None,
                bot: false,
            },
            TerminalPrompt,
        )
    }

    /// Bulk tools write one `.wiki` file per page on dry runs.
    fn bulk_editor(&self, run: &RunArgs) -> Editor<TerminalPrompt> {
        Editor::new(
            EditorOptions {
                dry_run: run.dry_run,
                dry_run_dir: Some(self.paths.dry_run_dir.clone()),
                bot: self.config.bot(),
            },
            TerminalPrompt,
        )
    }

    fn print_requests(&self) {
        println!("api_requests: {}", self.site.request_count());
    }
}

fn run_move(runtime: &RuntimeOptions, args: MoveArgs) -> Result<()> {
    let mut session = Session::open(runtime, !args.run.dry_run)?;
    let rules = session.rules()?;
    let mut editor = session.interactive_editor(&args.run);

    let mut request = MoveRequest::new(&args.old_title, &args.new_title, &args.move_reason);
    request.include_subpages = !args.ignore_subpages;
    request.backlinks = args.backlinks;
    request.lang = args.lang;
    request.limit = args.run.limit;
    request.reasons = UpdateReasons {
        redirect: args.redirect_reason,
        link: args.link_reason,
    };
    let report = advanced_move(&mut session.site, &mut editor, &rules, &request)?;

    let backlinks = report.backlinks();
    println!("move");
    println!("old_title: {}", request.old_title);
    println!("new_title: {}", request.new_title);
    println!("backlink_policy: {}", request.backlinks);
    println!("dry_run: {}", args.run.dry_run);
    println!("pages: {}", report.pages.len());
    for state in [
        MoveState::Moved,
        MoveState::AlreadyMoved,
        MoveState::WouldMove,
        MoveState::Skipped,
    ] {
        println!("pages.{}: {}", state.as_str(), report.count(state));
    }
    println!("backlinks.updated: {}", backlinks.updated);
    println!("backlinks.not_updated: {}", backlinks.not_updated);
    println!("backlinks.ignored: {}", backlinks.ignored);
    println!("limit_reached: {}", report.limit_reached);
    session.print_requests();
    Ok(())
}

fn run_backlinks(runtime: &RuntimeOptions, args: BacklinksArgs) -> Result<()> {
    let mut session = Session::open(runtime, false)?;
    let rules = session.rules()?;
    let groups =
        resolve_backlinks_with_subpages(&mut session.site, &args.title, args.lang.as_deref(), &rules)?;

    for (target, classification) in &groups {
        print_backlinks(target, classification, rules.display_max());
        println!("{target}.auto_redirects: {}", classification.auto_redirects.len());
        println!("{target}.manual_redirects: {}", classification.manual_redirects.len());
        println!("{target}.auto_links: {}", classification.auto_links.len());
        println!("{target}.manual_links: {}", classification.manual_links.len());
        println!("{target}.skipped: {}", classification.skipped.len());
        for (backlink, reason) in &classification.skipped {
            debug!(title = backlink.title.as_str(), reason = reason.as_str(), "skipped backlink");
        }
    }
    println!("targets: {}", groups.len());
    session.print_requests();
    Ok(())
}

fn run_cat_move(runtime: &RuntimeOptions, args: CatMoveArgs) -> Result<()> {
    let mut session = Session::open(runtime, !args.run.dry_run)?;
    let aliases = TemplateAliases::from_config(&session.config.categories);
    let mut editor = session.bulk_editor(&args.run);

    let source = args.source.category();
    let destination = LangCategory::new(
        &args.dst_base_name,
        args.dst_lang_code.as_deref().unwrap_or(&source.lang_code),
        args.dst_lang_name.as_deref().unwrap_or(&source.lang_name),
        args.dst_topic,
    );
    let summary = args
        .summary
        .unwrap_or_else(|| default_summary(&source.full_name(), &destination.full_name()));

    let page_action = if args.page {
        Some(move_or_redirect_category_page(
            &mut session.site,
            &mut editor,
            &source.full_name(),
            &destination.full_name(),
            &summary,
        )?)
    } else {
        None
    };
    let stats = move_members(
        &mut session.site,
        &mut editor,
        &source,
        &destination,
        &aliases,
        &summary,
        args.run.limit,
    )?;

    println!("cat-move");
    println!("source: {}", source.title());
    println!("destination: {}", destination.title());
    println!("dry_run: {}", args.run.dry_run);
    if let Some(action) = page_action {
        println!("category_page: {}", action.as_str());
    }
    println!("examined: {}", stats.examined);
    println!("changed: {}", stats.changed);
    println!("failed: {}", stats.failed);
    print_dry_run_dir(&session, &args.run);
    session.print_requests();
    Ok(())
}

fn run_cat_remove(runtime: &RuntimeOptions, args: CatRemoveArgs) -> Result<()> {
    let mut session = Session::open(runtime, !args.run.dry_run)?;
    let aliases = TemplateAliases::from_config(&session.config.categories);
    let mut editor = session.bulk_editor(&args.run);

    let category = args.category.category();
    let summary = args
        .summary
        .unwrap_or_else(|| format!("Removed [[{}]]", category.title()));
    let stats = remove_members(
        &mut session.site,
        &mut editor,
        &category,
        &aliases,
        &summary,
        args.run.limit,
    )?;

    println!("cat-remove");
    println!("category: {}", category.title());
    println!("dry_run: {}", args.run.dry_run);
    println!("examined: {}", stats.examined);
    println!("changed: {}", stats.changed);
    println!("failed: {}", stats.failed);
    print_dry_run_dir(&session, &args.run);
    session.print_requests();
    Ok(())
}

fn run_cat_recategorize(runtime: &RuntimeOptions, args: CatRecategorizeArgs) -> Result<()> {
    let action = match (args.action, args.new) {
        (RecategorizeAction::Add, Some(new)) => Recategorization::Add(new),
        (RecategorizeAction::Replace, Some(new)) => Recategorization::Replace(new),
        (RecategorizeAction::Remove, _) => Recategorization::Remove,
        (RecategorizeAction::Add | RecategorizeAction::Replace, None) => {
            bail!("`add` and `replace` need the category to add or replace with")
        }
    };
    let mut session = Session::open(runtime, !args.run.dry_run)?;
    let mut editor = session.bulk_editor(&args.run);

    let summary = args
        .summary
        .unwrap_or_else(|| action.default_summary(&args.existing));
    let stats = recategorize(
        &mut session.site,
        &mut editor,
        &args.existing,
        &action,
        &summary,
        args.run.limit,
    )?;

    println!("cat-recategorize");
    println!("action: {}", action.as_str());
    println!("category: {}", args.existing);
    println!("dry_run: {}", args.run.dry_run);
    println!("examined: {}", stats.examined);
    println!("changed: {}", stats.changed);
    println!("failed: {}", stats.failed);
    print_dry_run_dir(&session, &args.run);
    session.print_requests();
    Ok(())
}

fn run_cat_tree_move(runtime: &RuntimeOptions, args: CatTreeMoveArgs) -> Result<()> {
    let languages = LanguageTable::load(&args.langs_path)?;
    let mut session = Session::open(runtime, !args.run.dry_run)?;
    let aliases = TemplateAliases::from_config(&session.config.categories);
    let mut editor = session.bulk_editor(&args.run);

    let source = ParentCategory::new(&args.src_base_name, args.src_topic);
    let destination = ParentCategory::new(&args.dst_base_name, args.dst_topic);
    let summary = args
        .summary
        .unwrap_or_else(|| default_summary(&source.full_name(), &destination.full_name()));
    let request = TreeMoveRequest {
        source,
        destination_base: args.dst_base_name,
        destination_topic: args.dst_topic,
        move_parent_page: args.page,
        summary,
        limit: args.run.limit,
    };
    let report = move_category_tree(&mut session.site, &mut editor, &languages, &aliases, &request)?;

    println!("cat-tree-move");
    println!("source: {}", request.source.title());
    println!("languages: {}", languages.len());
    println!("dry_run: {}", args.run.dry_run);
    println!("subcategories: {}", report.subcategories);
    println!("unknown_languages: {}", report.unknown_languages.len());
    for subcategory in &report.unknown_languages {
        println!("unknown_languages.title: {subcategory}");
    }
    for (title, action) in &report.pages {
        println!("category_page.{title}: {}", action.as_str());
    }
    println!("members.examined: {}", report.members.examined);
    println!("members.changed: {}", report.members.changed);
    println!("members.failed: {}", report.members.failed);
    println!("actions: {}", report.actions);
    println!("limit_reached: {}", report.limit_reached);
    print_dry_run_dir(&session, &args.run);
    session.print_requests();
    Ok(())
}

fn run_template_rename(runtime: &RuntimeOptions, args: TemplateRenameArgs) -> Result<()> {
    let mut session = Session::open(runtime, !args.run.dry_run)?;
    let mut editor = session.bulk_editor(&args.run);

    let source = match (args.category, args.lang) {
        (Some(category), _) => PageSource::Category(category),
        (None, Some(lang)) => PageSource::Language(lang),
        (None, None) => bail!("template-rename needs --category or --lang"),
    };
    let summary = args.summary.unwrap_or_else(|| {
        format!(
            "Renamed {{{{{}}}}} to {{{{{}}}}}",
            args.old_name, args.new_name
        )
    });
    let request = TemplateRenameRequest {
        old_name: args.old_name,
        new_name: args.new_name,
        source,
        summary,
        limit: args.run.limit,
    };
    let stats = rename_template(&mut session.site, &mut editor, &request)?;

    println!("template-rename");
    println!("old_name: {}", request.old_name);
    println!("new_name: {}", request.new_name);
    println!("dry_run: {}", args.run.dry_run);
    println!("scanned: {}", stats.scanned);
    println!("changed: {}", stats.changed);
    println!("invocations: {}", stats.invocations);
    print_dry_run_dir(&session, &args.run);
    session.print_requests();
    Ok(())
}

fn run_guidelines(runtime: &RuntimeOptions, args: GuidelinesArgs) -> Result<()> {
    let mut session = Session::open(runtime, !args.run.dry_run)?;
    let rules = session.rules()?;
    let mut editor = session.interactive_editor(&args.run);

    let options = CampaignOptions {
        skip: args.skip,
        limit: args.run.limit,
    };
    let report = run_campaign(&mut session.site, &mut editor, &rules, &options)?;

    println!("guidelines");
    println!("dry_run: {}", args.run.dry_run);
    println!("moved: {}", report.moved);
    println!("skipped: {}", report.skipped);
    println!("sort_keys_removed: {}", report.sort_keys_removed);
    println!("backlinks.updated: {}", report.backlinks.updated);
    println!("backlinks.not_updated: {}", report.backlinks.not_updated);
    println!("quit: {}", report.quit);
    session.print_requests();
    Ok(())
}

fn print_dry_run_dir(session: &Session, run: &RunArgs) {
    if run.dry_run {
        println!(
            "dry_run_dir: {}",
            normalize_for_display(&session.paths.dry_run_dir)
        );
    }
}

fn resolve_runtime_paths(runtime: &RuntimeOptions) -> Result<ResolvedPaths> {
    dotenvy::dotenv().ok();

    let context = ResolutionContext::from_process()?;
    let overrides = PathOverrides {
        project_root: runtime.project_root.clone(),
        config: runtime.config.clone(),
        output_dir: runtime.output_dir.clone(),
    };

    let initial = resolve_paths(&context, &overrides)?;
    let project_env = initial.env_file();
    if project_env.exists() {
        let _ = dotenvy::from_path_override(&project_env);
    }

    resolve_paths(&context, &overrides)
}
