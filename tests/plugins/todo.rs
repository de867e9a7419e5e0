use std::sync::Arc;
use std::thread;
use std::time::Duration;
use taskmesh::core::error::TaskmeshError;
use taskmesh::core::store::Store;
use taskmesh::core::validate::TaskStatus;
use taskmesh::plugins::todo::{
    AgentTaskFilter, NewTodo, NoteTarget, add_prompt_notes, add_todos, clear_prompt_notes,
    clear_task_board, create_agent_task, create_human_task, get_agent_task, get_human_task,
    initialize_task_db, list_agent_tasks, list_human_tasks, record_files_modified,
    update_human_task_status, update_prompt_notes, update_task_status, update_todo_status,
};
use tempfile::tempdir;

fn todos(descriptions: &[&str]) -> Vec<NewTodo> {
    descriptions.iter().map(|d| NewTodo::new(d)).collect()
}

#[test]
fn test_board_lifecycle() {
    let tmp = tempdir().unwrap();
    let store = Store::at(tmp.path());
    initialize_task_db(&store).unwrap();

    let human = create_human_task(&store, "  Add login page  ").unwrap();
    assert!(human.starts_with("H_"));

    let agent = create_agent_task(
        &store,
        &human,
        "frontend",
        "Build the form",
        &todos(&["create form", "wire submit", "add tests"]),
    )
    .unwrap();
    assert!(agent.starts_with("A_"));

    let task = get_agent_task(&store, &agent).unwrap();
    assert_eq!(task.status, TaskStatus::Pending);
    assert_eq!(task.human_task_id, human);
    let order: Vec<i64> = task.todos.iter().map(|t| t.order_index).collect();
    assert_eq!(order, vec![0, 1, 2]);
    assert!(task.todos.iter().all(|t| t.status == TaskStatus::Pending));
    assert_eq!(task.todos[1].description, "wire submit");

    let second = task.todos[1].id.clone();
    update_todo_status(&store, &agent, &second, "completed").unwrap();
    let task = get_agent_task(&store, &agent).unwrap();
    assert_eq!(task.todos[0].status, TaskStatus::Pending);
    assert_eq!(task.todos[1].status, TaskStatus::Completed);
    assert!(task.todos[1].completed_at.is_some());
    assert_eq!(task.todos[2].status, TaskStatus::Pending);

    update_task_status(&store, &agent, "in_progress").unwrap();
    update_human_task_status(&store, &human, "in_progress").unwrap();

    let detail = get_human_task(&store, &human).unwrap();
    assert_eq!(detail.task.prompt, "Add login page");
    assert_eq!(detail.task.status, TaskStatus::InProgress);
    assert_eq!(detail.agent_tasks.len(), 1);
    assert_eq!(detail.agent_tasks[0].status, TaskStatus::InProgress);
}

#[test]
fn test_appended_todos_continue_order() {
    let tmp = tempdir().unwrap();
    let store = Store::at(tmp.path());
    let human = create_human_task(&store, "refactor").unwrap();
    let agent = create_agent_task(&store, &human, "backend", "", &todos(&["a", "b"])).unwrap();

    let ids = add_todos(&store, &agent, &todos(&["c", "d"])).unwrap();
    assert_eq!(ids.len(), 2);

    let task = get_agent_task(&store, &agent).unwrap();
    let order: Vec<(i64, &str)> = task
        .todos
        .iter()
        .map(|t| (t.order_index, t.description.as_str()))
        .collect();
    assert_eq!(order, vec![(0, "a"), (1, "b"), (2, "c"), (3, "d")]);

    let err = add_todos(&store, &agent, &[]).unwrap_err();
    assert!(matches!(err, TaskmeshError::ValidationError(_)));
}

#[test]
fn test_todo_locators_are_kept() {
    let tmp = tempdir().unwrap();
    let store = Store::at(tmp.path());
    let human = create_human_task(&store, "fix parser").unwrap();
    let todo = NewTodo {
        description: "handle empty input".to_string(),
        file_path: Some("src/parser.rs".to_string()),
        function_name: Some("parse".to_string()),
        context_hint: Some("   ".to_string()),
    };
    let agent = create_agent_task(&store, &human, "backend", "", &[todo]).unwrap();
    let task = get_agent_task(&store, &agent).unwrap();
    assert_eq!(task.todos[0].file_path.as_deref(), Some("src/parser.rs"));
    assert_eq!(task.todos[0].function_name.as_deref(), Some("parse"));
    assert_eq!(task.todos[0].context_hint, None);
}

#[test]
fn test_concurrent_todo_updates_do_not_interfere() {
    let tmp = tempdir().unwrap();
    let store = Arc::new(Store::at(tmp.path()));
    initialize_task_db(&store).unwrap();
    let human = create_human_task(&store, "parallel work").unwrap();
    let descriptions: Vec<String> = (0..8).map(|i| format!("step {}", i)).collect();
    let new_todos: Vec<NewTodo> = descriptions.iter().map(|d| NewTodo::new(d)).collect();
    let agent = create_agent_task(&store, &human, "worker", "", &new_todos).unwrap();
    let todo_ids: Vec<String> = get_agent_task(&store, &agent)
        .unwrap()
        .todos
        .into_iter()
        .map(|t| t.id)
        .collect();

    let handles: Vec<_> = todo_ids
        .iter()
        .enumerate()
        .map(|(i, todo_id)| {
            let store = Arc::clone(&store);
            let agent = agent.clone();
            let todo_id = todo_id.clone();
            thread::spawn(move || {
                let status = if i % 2 == 0 { "completed" } else { "blocked" };
                update_todo_status(&store, &agent, &todo_id, status).unwrap();
                add_prompt_notes(
                    &store,
                    NoteTarget::Todo {
                        agent_task_id: &agent,
                        todo_id: &todo_id,
                    },
                    &format!("note {}", i),
                )
                .unwrap();
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let task = get_agent_task(&store, &agent).unwrap();
    for (i, todo) in task.todos.iter().enumerate() {
        let expected = if i % 2 == 0 {
            TaskStatus::Completed
        } else {
            TaskStatus::Blocked
        };
        assert_eq!(todo.status, expected, "todo {}", i);
        assert_eq!(todo.human_prompt_notes, format!("note {}", i));
    }
    assert_eq!(task.status, TaskStatus::Pending);
}

#[test]
fn test_completing_every_todo_leaves_task_status_alone() {
    let tmp = tempdir().unwrap();
    let store = Store::at(tmp.path());
    let human = create_human_task(&store, "docs").unwrap();
    let agent = create_agent_task(&store, &human, "writer", "", &todos(&["intro", "usage"])).unwrap();
    for todo in get_agent_task(&store, &agent).unwrap().todos {
        update_todo_status(&store, &agent, &todo.id, "completed").unwrap();
    }
    let task = get_agent_task(&store, &agent).unwrap();
    assert!(task.todos.iter().all(|t| t.status == TaskStatus::Completed));
    assert_eq!(task.status, TaskStatus::Pending);
}

#[test]
fn test_prompt_note_timestamps() {
    let tmp = tempdir().unwrap();
    let store = Store::at(tmp.path());
    let human = create_human_task(&store, "review").unwrap();
    let agent = create_agent_task(&store, &human, "reviewer", "", &todos(&["read diff"])).unwrap();
    let target = NoteTarget::Task {
        agent_task_id: &agent,
    };

    add_prompt_notes(&store, target, "Use **bold** sparingly").unwrap();
    let first = get_agent_task(&store, &agent).unwrap();
    assert_eq!(first.human_prompt_notes, "Use **bold** sparingly");
    let added_at = first.human_prompt_notes_added_at.unwrap();
    assert_eq!(first.human_prompt_notes_updated_at, Some(added_at));

    thread::sleep(Duration::from_millis(5));
    update_prompt_notes(&store, target, "Prefer `Result` over panics").unwrap();
    let second = get_agent_task(&store, &agent).unwrap();
    assert_eq!(second.human_prompt_notes, "Prefer `Result` over panics");
    assert_eq!(second.human_prompt_notes_added_at, Some(added_at));
    assert!(second.human_prompt_notes_updated_at.unwrap() > added_at);

    clear_prompt_notes(&store, target).unwrap();
    let cleared = get_agent_task(&store, &agent).unwrap();
    assert_eq!(cleared.human_prompt_notes, "");
    assert_eq!(cleared.human_prompt_notes_added_at, None);
    assert_eq!(cleared.human_prompt_notes_updated_at, None);

    add_prompt_notes(&store, target, "fresh start").unwrap();
    let readded = get_agent_task(&store, &agent).unwrap();
    assert_eq!(readded.human_prompt_notes, "fresh start");
    assert!(readded.human_prompt_notes_added_at.unwrap() >= added_at);
}

#[test]
fn test_todo_notes_leave_parent_untouched() {
    let tmp = tempdir().unwrap();
    let store = Store::at(tmp.path());
    let human = create_human_task(&store, "notes").unwrap();
    let agent = create_agent_task(&store, &human, "dev", "", &todos(&["one", "two"])).unwrap();
    let task = get_agent_task(&store, &agent).unwrap();
    let first = task.todos[0].id.clone();

    add_prompt_notes(
        &store,
        NoteTarget::Todo {
            agent_task_id: &agent,
            todo_id: &first,
        },
        "watch the <b>edge</b> case",
    )
    .unwrap();

    let after = get_agent_task(&store, &agent).unwrap();
    assert_eq!(after.human_prompt_notes, "");
    assert_eq!(after.human_prompt_notes_added_at, None);
    assert_eq!(after.todos[0].human_prompt_notes, "watch the <b>edge</b> case");
    assert_eq!(after.todos[1].human_prompt_notes, "");
}

#[test]
fn test_notes_are_sanitized_and_bounded() {
    let tmp = tempdir().unwrap();
    let store = Store::at(tmp.path());
    let human = create_human_task(&store, "security").unwrap();
    let agent = create_agent_task(&store, &human, "dev", "", &[]).unwrap();
    let target = NoteTarget::Task {
        agent_task_id: &agent,
    };

    add_prompt_notes(&store, target, "ok<script>alert(1)</script> [x](javascript:alert(1))").unwrap();
    let notes = get_agent_task(&store, &agent).unwrap().human_prompt_notes;
    assert!(!notes.contains("<script"));
    assert!(!notes.contains("javascript:"));
    assert!(notes.starts_with("ok"));

    let long = "a".repeat(5001);
    let err = update_prompt_notes(&store, target, &long).unwrap_err();
    assert!(matches!(err, TaskmeshError::ValidationError(_)));
    assert!(update_prompt_notes(&store, target, &"a".repeat(5000)).is_ok());

    let err = add_prompt_notes(&store, target, "   ").unwrap_err();
    assert!(matches!(err, TaskmeshError::ValidationError(_)));
}

#[test]
fn test_validation_errors() {
    let tmp = tempdir().unwrap();
    let store = Store::at(tmp.path());

    let err = create_human_task(&store, "   ").unwrap_err();
    assert!(matches!(err, TaskmeshError::ValidationError(_)));

    let human = create_human_task(&store, "x").unwrap();
    let err = create_agent_task(&store, &human, "", "", &[]).unwrap_err();
    assert!(matches!(err, TaskmeshError::ValidationError(_)));

    let err = create_agent_task(&store, &human, "dev", "", &todos(&["ok", "  "])).unwrap_err();
    assert!(matches!(err, TaskmeshError::ValidationError(_)));

    let agent = create_agent_task(&store, &human, "dev", "", &todos(&["a"])).unwrap();
    let err = update_task_status(&store, &agent, "done").unwrap_err();
    assert!(matches!(err, TaskmeshError::ValidationError(_)));
    assert_eq!(get_agent_task(&store, &agent).unwrap().status, TaskStatus::Pending);

    let err = record_files_modified(&store, &agent, &["  ".to_string()]).unwrap_err();
    assert!(matches!(err, TaskmeshError::ValidationError(_)));
}

#[test]
fn test_missing_parents_are_not_found() {
    let tmp = tempdir().unwrap();
    let store = Store::at(tmp.path());

    let err = create_agent_task(&store, "H_missing", "dev", "", &todos(&["a"])).unwrap_err();
    assert!(matches!(err, TaskmeshError::NotFound(_)));
    assert!(list_agent_tasks(&store, &AgentTaskFilter::default()).unwrap().is_empty());

    let err = update_task_status(&store, "A_missing", "completed").unwrap_err();
    assert!(matches!(err, TaskmeshError::NotFound(_)));

    let human = create_human_task(&store, "x").unwrap();
    let agent = create_agent_task(&store, &human, "dev", "", &todos(&["a"])).unwrap();
    let err = update_todo_status(&store, &agent, "T_missing", "completed").unwrap_err();
    assert!(err.to_string().contains("T_missing"));
    assert!(matches!(err, TaskmeshError::NotFound(_)));

    let other_human = create_human_task(&store, "y").unwrap();
    let other = create_agent_task(&store, &other_human, "dev", "", &todos(&["b"])).unwrap();
    let foreign_todo = get_agent_task(&store, &other).unwrap().todos[0].id.clone();
    let err = update_todo_status(&store, &agent, &foreign_todo, "completed").unwrap_err();
    assert!(matches!(err, TaskmeshError::NotFound(_)));

    let err = get_human_task(&store, "H_missing").unwrap_err();
    assert!(matches!(err, TaskmeshError::NotFound(_)));

    let err = list_agent_tasks(
        &store,
        &AgentTaskFilter {
            human_task_id: Some("H_missing".to_string()),
            ..AgentTaskFilter::default()
        },
    )
    .unwrap_err();
    assert!(matches!(err, TaskmeshError::NotFound(_)));
}

#[test]
fn test_list_filters() {
    let tmp = tempdir().unwrap();
    let store = Store::at(tmp.path());
    let h1 = create_human_task(&store, "first").unwrap();
    let h2 = create_human_task(&store, "second").unwrap();
    let a1 = create_agent_task(&store, &h1, "frontend", "", &[]).unwrap();
    let a2 = create_agent_task(&store, &h1, "backend", "", &[]).unwrap();
    let a3 = create_agent_task(&store, &h2, "backend", "", &[]).unwrap();
    update_task_status(&store, &a3, "blocked").unwrap();

    let humans: Vec<String> = list_human_tasks(&store).unwrap().into_iter().map(|h| h.id).collect();
    assert_eq!(humans, vec![h1.clone(), h2.clone()]);

    let ids = |filter: AgentTaskFilter| -> Vec<String> {
        list_agent_tasks(&store, &filter)
            .unwrap()
            .into_iter()
            .map(|t| t.id)
            .collect()
    };
    assert_eq!(ids(AgentTaskFilter::default()), vec![a1.clone(), a2.clone(), a3.clone()]);
    assert_eq!(
        ids(AgentTaskFilter {
            human_task_id: Some(h1.clone()),
            ..AgentTaskFilter::default()
        }),
        vec![a1.clone(), a2.clone()]
    );
    assert_eq!(
        ids(AgentTaskFilter {
            agent_role: Some("backend".to_string()),
            ..AgentTaskFilter::default()
        }),
        vec![a2.clone(), a3.clone()]
    );
    assert_eq!(
        ids(AgentTaskFilter {
            agent_role: Some("backend".to_string()),
            status: Some("blocked".to_string()),
            ..AgentTaskFilter::default()
        }),
        vec![a3]
    );
}

#[test]
fn test_files_modified_are_merged() {
    let tmp = tempdir().unwrap();
    let store = Store::at(tmp.path());
    let human = create_human_task(&store, "x").unwrap();
    let agent = create_agent_task(&store, &human, "dev", "", &[]).unwrap();

    record_files_modified(&store, &agent, &["src/a.rs".to_string(), "src/b.rs".to_string()]).unwrap();
    let files =
        record_files_modified(&store, &agent, &["src/b.rs".to_string(), " src/c.rs ".to_string()])
            .unwrap();
    assert_eq!(files, vec!["src/a.rs", "src/b.rs", "src/c.rs"]);
    assert_eq!(get_agent_task(&store, &agent).unwrap().files_modified, files);
}

#[test]
fn test_clear_board_then_reuse() {
    let tmp = tempdir().unwrap();
    let store = Store::at(tmp.path());
    let human = create_human_task(&store, "x").unwrap();
    create_agent_task(&store, &human, "dev", "", &todos(&["a", "b"])).unwrap();
    create_agent_task(&store, &human, "qa", "", &todos(&["c"])).unwrap();

    let report = clear_task_board(&store).unwrap();
    assert_eq!(report.human_tasks_deleted, 1);
    assert_eq!(report.agent_tasks_deleted, 2);
    assert_eq!(report.todos_deleted, 3);
    assert!(list_human_tasks(&store).unwrap().is_empty());
    assert!(list_agent_tasks(&store, &AgentTaskFilter::default()).unwrap().is_empty());

    let again = clear_task_board(&store).unwrap();
    assert_eq!(again.human_tasks_deleted, 0);

    let fresh = create_human_task(&store, "after clear").unwrap();
    assert_eq!(list_human_tasks(&store).unwrap()[0].id, fresh);
}
