//! `iapadmin config` and `iapadmin instances`

use anyhow::bail;
use console::style;
use iapadmin_core::tabs::project_from_console_url;
use iapadmin_protocol::client::Variables;

use crate::app::App;
use crate::render;

pub async fn config(app: &mut App) -> anyhow::Result<()> {
    app.load(&Variables::new()).await?;
    let Some(catalog) = app.console.catalog() else {
        return Ok(());
    };

    println!("{}", render::catalog_table(&catalog.entries()));

    if !catalog.common().is_empty() {
        println!();
        println!("{}", style("Common parameters").bold());
        for param in catalog.common() {
            println!("  {} = {:?}  {}", param.name, param.value, param.spec.description);
        }
    }
    if !catalog.instance_operations().is_empty() {
        println!();
        println!("{}", style("Instance operations").bold());
        for op in catalog.instance_operations() {
            println!("  {}  {}", op.name, op.description);
        }
    }
    println!();
    println!(
        "Features: {}",
        render::capability_summary(&catalog.capabilities())
    );
    Ok(())
}

pub async fn instances(
    app: &mut App,
    project: Option<String>,
    console_url: Option<String>,
    commons: &Variables,
) -> anyhow::Result<()> {
    let project = match (project, console_url) {
        (Some(project), _) => Some(project),
        (None, Some(url)) => match project_from_console_url(&url, &app.settings.console_host) {
            Some(project) => Some(project),
            None => bail!("no project in console URL {url}"),
        },
        (None, None) => None,
    };

    app.load(commons).await?;
    let project = app.resolve(project).await?;

    let instances = app.console.directory().instances();
    println!("Project: {}", style(&project).bold());
    if instances.is_empty() {
        println!("No compute instances.");
    } else {
        println!("{}", render::instance_table(instances));
    }
    Ok(())
}
