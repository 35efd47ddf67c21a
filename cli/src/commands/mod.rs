mod helpers;
mod ingredient;
mod list;
mod pantry;
mod plan;
mod recipe;
mod settings;
mod shop;

pub(crate) use ingredient::{
    cmd_ingredient_add, cmd_ingredient_delete, cmd_ingredient_import, cmd_ingredient_list,
};
pub(crate) use list::{cmd_list_add, cmd_list_cleanup, cmd_list_delete, cmd_list_generate, cmd_list_show};
pub(crate) use pantry::{cmd_pantry_remaining, cmd_pantry_set, cmd_pantry_show, cmd_pantry_sync};
pub(crate) use plan::{
    cmd_plan_add, cmd_plan_assign, cmd_plan_name, cmd_plan_remove, cmd_plan_servings,
    cmd_plan_show, cmd_plan_skip, cmd_plan_unassign,
};
pub(crate) use recipe::{
    cmd_recipe_add_ingredient, cmd_recipe_create, cmd_recipe_delete, cmd_recipe_list,
    cmd_recipe_remove_ingredient, cmd_recipe_servings, cmd_recipe_show,
};
pub(crate) use settings::cmd_settings_week_start;
pub(crate) use shop::{cmd_shop_check, cmd_shop_show};
