use anyhow::{Context as _, Result};
use reconcile::Users;

use crate::Context;
use crate::ui;

pub fn run(ctx: &Context) -> Result<()> {
    let users = Users::new(&ctx.config.host.passwd);
    let all = users
        .all()
        .with_context(|| format!("Could not read {}", users.path().display()))?;
    ui::header("Users");
    for user in all {
        ui::kv(&user.name, &format!("{}:{} {} {}", user.uid, user.gid, user.home, user.shell));
    }
    Ok(())
}
